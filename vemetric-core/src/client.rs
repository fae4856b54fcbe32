//! The tracking client
//!
//! [`Tracker`] moves from uninitialized to initialized exactly once and then
//! turns page views, custom events, clicks and identity changes into
//! payloads for the [`Dispatcher`].
//!
//! ## Host events
//!
//! The tracker never patches the host's navigation or DOM. Hosts report
//! what happened and the tracker reacts if the matching listener is
//! enabled:
//!
//! | Host call | Listener | Reaction |
//! |-----------|----------|----------|
//! | [`Tracker::notify_navigation`] | `enable_track_page_views` | page view |
//! | [`Tracker::notify_unload`] | registered by `init` | page leave beacon |
//! | [`Tracker::notify_click`] | `enable_track_outbound_links` | outbound link beacon |
//! | [`Tracker::notify_click`] | `enable_track_data_attributes` | `data-vmtrc` event |
//!
//! ## Identify and user updates
//!
//! `identify` stores the user optimistically and rolls back if the request
//! fails. Only one identify runs at a time; overlapping calls are dropped.
//! `update_user` waits for a running identify, polling once per second for
//! up to five retries, and is dropped if identify is still running then.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use url::Url;

use crate::config::{Options, SuppressionConfig, TrackerConfig};
use crate::error::{Error, Result};
use crate::identity::{IdentityStore, SessionStorage};
use crate::masking::mask_url;
use crate::page::{ClickEvent, Page};
use crate::payload::{
    EventPayload, EventProps, IdentifyPayload, IdentifyProps, PagePayload, UpdateUserPayload,
    UserData,
};
use crate::retry::{retry, RetryOptions, RetryStart};
use crate::suppression::Suppression;
use crate::transport::{Dispatcher, Headers, Transport, ALLOW_COOKIES_HEADER, REFERRER_HEADER};

/// Reserved event name for page views
pub const PAGE_VIEW_EVENT: &str = "$$pageView";

/// Reserved event name for clicks on links to other origins
pub const OUTBOUND_LINK_EVENT: &str = "$$outboundLink";

/// Marks a clickable element; the value is the event name
pub const DATA_ATTRIBUTE: &str = "data-vmtrc";

/// Attributes with this prefix become custom data on `data-vmtrc` events
pub const DATA_ATTRIBUTE_PREFIX: &str = "data-vmtrc-";

const UPDATE_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const UPDATE_MAX_RETRIES: u32 = 5;

/// What kind of client-side navigation the host performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// A new history entry (`pushState`, router push)
    Push,
    /// The current entry was replaced (`replaceState`, router replace)
    Replace,
    /// Back/forward
    Pop,
    /// Fragment change
    HashChange,
}

/// Configuration and transport created by `init`
struct Session {
    config: TrackerConfig,
    dispatcher: Dispatcher,
}

#[derive(Debug, Default, Clone, Copy)]
struct Listeners {
    page_leave: bool,
    navigation: bool,
    outbound_links: bool,
    data_attributes: bool,
}

#[derive(Default)]
struct State {
    session: Option<Arc<Session>>,
    last_viewed_page: Option<String>,
    listeners: Listeners,
}

struct Inner {
    page: Arc<dyn Page>,
    identity: IdentityStore,
    transport: Arc<dyn Transport>,
    suppression: Suppression,
    identifying: Arc<AtomicBool>,
    /// Deferred user updates that `flush` waits for
    deferred: Arc<Mutex<Vec<JoinHandle<()>>>>,
    state: Mutex<State>,
}

/// Clears the identify in-flight flag when dropped
struct IdentifyGuard(Arc<AtomicBool>);

impl Drop for IdentifyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cheaply clonable handle to one tracking client
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl Tracker {
    pub fn new(
        page: Arc<dyn Page>,
        storage: Arc<dyn SessionStorage>,
        transport: Arc<dyn Transport>,
        suppression: SuppressionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                page,
                identity: IdentityStore::new(storage),
                transport,
                suppression: Suppression::new(suppression),
                identifying: Arc::new(AtomicBool::new(false)),
                deferred: Arc::new(Mutex::new(Vec::new())),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Initialize with `options`.
    ///
    /// Returns `Ok(false)` if already initialized. An invalid token fails
    /// without changing state. Depending on the resolved flags this tracks
    /// the first page view and enables the page view, outbound link and
    /// data attribute listeners.
    pub async fn init(&self, options: Options) -> Result<bool> {
        let session = {
            let mut state = self.state();
            if state.session.is_some() {
                tracing::debug!("Already initialized, ignoring init");
                return Ok(false);
            }

            let config = options.resolve()?;
            let dispatcher = Dispatcher::new(
                &config,
                self.inner.page.clone(),
                self.inner.suppression.clone(),
                self.inner.transport.clone(),
            );
            let session = Arc::new(Session { config, dispatcher });
            state.session = Some(session.clone());
            state.listeners.page_leave = true;
            session
        };

        tracing::info!(
            host = %session.config.host,
            mask_paths = session.config.mask_paths.len(),
            "Vemetric initialized"
        );

        if session.config.track_page_views {
            self.enable_track_page_views()?;
            if let Err(e) = self.track_page_view().await {
                tracing::warn!(error = %e, "Failed to track initial page view");
            }
        }
        if session.config.track_outbound_links {
            self.enable_track_outbound_links()?;
        }
        if session.config.track_data_attributes {
            self.enable_track_data_attributes()?;
        }

        Ok(true)
    }

    pub fn is_initialized(&self) -> bool {
        self.state().session.is_some()
    }

    /// Whether an identify request is in flight
    pub fn is_identifying(&self) -> bool {
        self.inner.identifying.load(Ordering::SeqCst)
    }

    /// Track a page view unless the URL equals the last tracked one.
    pub async fn track_page_view(&self) -> Result<()> {
        let session = self.session()?;
        let href = self.inner.page.href();
        {
            let mut state = self.state();
            if state.last_viewed_page.as_deref() == Some(href.as_str()) {
                tracing::debug!(url = %href, "Page already tracked");
                return Ok(());
            }
            state.last_viewed_page = Some(href.clone());
        }

        self.send_event(&session, href, PAGE_VIEW_EVENT, EventProps::default())
            .await
    }

    /// Report that the user is leaving the page. Always a beacon.
    pub fn track_page_leave(&self) -> Result<()> {
        let session = self.session()?;
        let payload = self.page_payload(&session, &self.inner.page.href())?;
        session
            .dispatcher
            .send_beacon("/l", serde_json::to_value(payload)?, Headers::new());
        Ok(())
    }

    pub async fn track_event(&self, name: &str, props: EventProps) -> Result<()> {
        let session = self.session()?;
        let href = self.inner.page.href();
        self.send_event(&session, href, name, props).await
    }

    /// Identifier stored for this session, if any
    pub fn user_identifier(&self) -> Option<String> {
        self.inner.identity.user_identifier()
    }

    /// Identify the current user.
    ///
    /// Dropped silently while another identify is in flight. The user is
    /// stored before the request and cleared again if the request fails.
    pub async fn identify(&self, props: IdentifyProps) -> Result<()> {
        let session = self.session()?;
        if self.inner.identifying.swap(true, Ordering::SeqCst) {
            tracing::debug!(identifier = %props.identifier, "Identify already in flight, dropping");
            return Ok(());
        }
        let _guard = IdentifyGuard(self.inner.identifying.clone());

        let result = self.send_identify(&session, props).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Identify failed, clearing user");
            if let Err(clear_err) = self.inner.identity.clear_user() {
                tracing::warn!(error = %clear_err, "Failed to clear user after identify");
            }
        }
        result
    }

    /// Update the stored user profile.
    ///
    /// Sent right away unless an identify is in flight; then it is deferred
    /// until identify finishes, or dropped if it does not finish in time.
    pub async fn update_user(&self, data: UserData) -> Result<()> {
        let session = self.session()?;
        let body = serde_json::to_value(UpdateUserPayload { data })?;

        if !self.is_identifying() {
            session
                .dispatcher
                .send_request("/u", body, Headers::new())
                .await?;
            return Ok(());
        }

        tracing::debug!("Identify in flight, deferring user update");
        let identifying = self.inner.identifying.clone();
        let deferred = self.inner.deferred.clone();
        let start = retry(RetryOptions {
            interval: UPDATE_RETRY_INTERVAL,
            max_retries: UPDATE_MAX_RETRIES,
            should_retry: move || identifying.load(Ordering::SeqCst),
            callback: move || {
                let send = tokio::spawn(async move {
                    if let Err(e) = session
                        .dispatcher
                        .send_request("/u", body, Headers::new())
                        .await
                    {
                        tracing::warn!(error = %e, "Deferred user update failed");
                    }
                });
                track_task(&deferred, send);
            },
        });
        match start {
            RetryStart::Immediate => {
                tracing::debug!("Identify finished before deferral, user update sent");
            }
            RetryStart::Scheduled(task) => track_task(&self.inner.deferred, task),
        }
        Ok(())
    }

    /// Forget the user locally, then tell the endpoint.
    pub async fn reset_user(&self) -> Result<()> {
        let session = self.session()?;
        self.inner.identity.clear_user()?;
        session
            .dispatcher
            .send_request("/r", json!({}), Headers::new())
            .await?;
        Ok(())
    }

    /// Track a page view after every navigation the host reports.
    pub fn enable_track_page_views(&self) -> Result<()> {
        self.enable(|l| l.navigation = true)
    }

    /// Track clicks on links that leave the current origin.
    pub fn enable_track_outbound_links(&self) -> Result<()> {
        self.enable(|l| l.outbound_links = true)
    }

    /// Track clicks on elements marked with `data-vmtrc`.
    pub fn enable_track_data_attributes(&self) -> Result<()> {
        self.enable(|l| l.data_attributes = true)
    }

    /// Report a navigation the host already performed.
    pub async fn notify_navigation(&self, kind: NavigationKind) -> Result<()> {
        if !self.listeners().navigation {
            return Ok(());
        }
        tracing::debug!(?kind, "Navigation");
        self.track_page_view().await
    }

    /// Report that the page is being unloaded.
    pub fn notify_unload(&self) {
        if !self.listeners().page_leave {
            return;
        }
        if let Err(e) = self.track_page_leave() {
            tracing::warn!(error = %e, "Failed to track page leave");
        }
    }

    /// Report a click anywhere on the page.
    pub async fn notify_click(&self, click: &ClickEvent) -> Result<()> {
        let listeners = self.listeners();

        if listeners.outbound_links {
            if let Some(href) = self.outbound_href(click) {
                self.track_event(OUTBOUND_LINK_EVENT, EventProps::new().data("href", href).beacon())
                    .await?;
            }
        }

        if listeners.data_attributes {
            if let Some((name, data)) = data_attribute_event(click) {
                let props = EventProps {
                    event_data: data,
                    ..Default::default()
                };
                self.track_event(&name, props).await?;
            }
        }

        Ok(())
    }

    /// Wait for deferred user updates and outstanding beacons.
    ///
    /// A user update still waiting on identify is waited for until it is
    /// sent or dropped.
    pub async fn flush(&self) {
        loop {
            let tasks: Vec<JoinHandle<()>> = lock(&self.inner.deferred).drain(..).collect();
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Deferred task did not complete");
                }
            }
        }
        self.inner.transport.flush().await;
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.state().session.clone().ok_or(Error::NotInitialized)
    }

    fn listeners(&self) -> Listeners {
        self.state().listeners
    }

    fn enable(&self, f: impl FnOnce(&mut Listeners)) -> Result<()> {
        let mut state = self.state();
        if state.session.is_none() {
            return Err(Error::NotInitialized);
        }
        f(&mut state.listeners);
        Ok(())
    }

    fn page_payload(&self, session: &Session, href: &str) -> Result<PagePayload> {
        Ok(PagePayload {
            url: mask_url(href, &session.config.mask_paths),
            context_id: self.inner.identity.get_or_create_context_id()?,
            identifier: self.inner.identity.user_identifier(),
            display_name: self.inner.identity.user_display_name(),
        })
    }

    async fn send_event(
        &self,
        session: &Session,
        href: String,
        name: &str,
        props: EventProps,
    ) -> Result<()> {
        let payload = EventPayload {
            page: self.page_payload(session, &href)?,
            name: name.to_string(),
            custom_data: Some(props.event_data).filter(|d| !d.is_empty()),
            user_data: props.user_data.filter(|d| !d.is_empty()),
        };
        let body = serde_json::to_value(payload)?;

        if props.beacon {
            session.dispatcher.send_beacon("/e", body, Headers::new());
            return Ok(());
        }

        let mut headers = Headers::new();
        if let Some(referrer) = self.inner.page.referrer() {
            if !referrer.is_empty() && referrer != href {
                headers.insert(REFERRER_HEADER.to_string(), referrer);
            }
        }

        session.dispatcher.send_request("/e", body, headers).await?;
        Ok(())
    }

    async fn send_identify(&self, session: &Session, props: IdentifyProps) -> Result<()> {
        self.inner
            .identity
            .set_user(&props.identifier, props.display_name.as_deref())?;

        let mut headers = Headers::new();
        if let Some(allow_cookies) = props.allow_cookies {
            headers.insert(ALLOW_COOKIES_HEADER.to_string(), allow_cookies.to_string());
        }

        let body = serde_json::to_value(IdentifyPayload {
            identifier: props.identifier,
            display_name: props.display_name,
            data: props.data.filter(|d| !d.is_empty()),
        })?;

        session.dispatcher.send_request("/i", body, headers).await?;
        Ok(())
    }

    /// Raw href of the nearest anchor if it points to another origin
    fn outbound_href(&self, click: &ClickEvent) -> Option<String> {
        let anchor = click.closest(|e| e.tag() == "a" && e.has_attribute("href"))?;
        let raw = anchor.attribute("href")?;

        let page = Url::parse(&self.inner.page.href()).ok()?;
        let target = page.join(raw).ok()?;
        if target.origin() == page.origin() {
            return None;
        }
        Some(raw.to_string())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keep `task` for `flush`, forgetting finished ones.
fn track_task(tasks: &Mutex<Vec<JoinHandle<()>>>, task: JoinHandle<()>) {
    let mut tasks = lock(tasks);
    tasks.retain(|t| !t.is_finished());
    tasks.push(task);
}

/// Event name and custom data of the nearest `data-vmtrc` element
fn data_attribute_event(click: &ClickEvent) -> Option<(String, Map<String, Value>)> {
    let element = click.closest(|e| e.has_attribute(DATA_ATTRIBUTE))?;
    let name = element.attribute(DATA_ATTRIBUTE)?;
    if name.is_empty() {
        return None;
    }

    let data = element
        .attributes()
        .filter_map(|(attr, value)| {
            let key = attr.strip_prefix(DATA_ATTRIBUTE_PREFIX)?;
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_string(), Value::String(value.to_string())))
        })
        .collect();

    Some((name.to_string(), data))
}
