//! Embedding entry point
//!
//! Pages may call the tracker before it has loaded. Those calls go into a
//! [`CommandQueue`] and run, in order, once [`Loader::boot`] has initialized
//! the tracker. The queue moves through three phases exactly once:
//!
//! ```text
//! Buffering ──boot──► Draining ──queue empty──► Ready
//! ```
//!
//! Commands dispatched while buffering or draining are appended to the
//! queue, so arrival order is execution order. Once ready, commands run
//! directly against the tracker.
//!
//! A queue built with [`CommandQueue::with_storage`] answers
//! `user_identifier` from session storage before boot, so an identity
//! stored earlier in the session is visible right away.
//!
//! Options come from a pre-set [`Options`] object, overridden by the
//! declarative attributes of the embedding element ([`ScriptAttributes`]).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::client::Tracker;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::identity::{IdentityStore, SessionStorage};
use crate::payload::{EventProps, IdentifyProps, UserData};

/// A call on the public tracker surface
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Init(Options),
    TrackPageView,
    TrackPageLeave,
    TrackEvent { name: String, props: EventProps },
    Identify(IdentifyProps),
    UpdateUser(UserData),
    ResetUser,
    EnableTrackPageViews,
    EnableTrackOutboundLinks,
    EnableTrackDataAttributes,
}

impl Command {
    /// Method name on the tracker surface
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init(_) => "init",
            Command::TrackPageView => "trackPageView",
            Command::TrackPageLeave => "trackPageLeave",
            Command::TrackEvent { .. } => "trackEvent",
            Command::Identify(_) => "identify",
            Command::UpdateUser(_) => "updateUser",
            Command::ResetUser => "resetUser",
            Command::EnableTrackPageViews => "enableTrackPageViews",
            Command::EnableTrackOutboundLinks => "enableTrackOutboundLinks",
            Command::EnableTrackDataAttributes => "enableTrackDataAttributes",
        }
    }

    /// Run against a tracker
    pub async fn execute(self, tracker: &Tracker) -> Result<()> {
        match self {
            Command::Init(options) => {
                if !tracker.init(options).await? {
                    tracing::debug!("Queued init ignored, tracker already initialized");
                }
                Ok(())
            }
            Command::TrackPageView => tracker.track_page_view().await,
            Command::TrackPageLeave => tracker.track_page_leave(),
            Command::TrackEvent { name, props } => tracker.track_event(&name, props).await,
            Command::Identify(props) => tracker.identify(props).await,
            Command::UpdateUser(data) => tracker.update_user(data).await,
            Command::ResetUser => tracker.reset_user().await,
            Command::EnableTrackPageViews => tracker.enable_track_page_views(),
            Command::EnableTrackOutboundLinks => tracker.enable_track_outbound_links(),
            Command::EnableTrackDataAttributes => tracker.enable_track_data_attributes(),
        }
    }
}

/// What [`CommandQueue::dispatch`] did with a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Held until the tracker is ready
    Queued,
    /// Ran against the tracker
    Executed,
}

enum Phase {
    Buffering,
    Draining,
    Ready(Tracker),
}

struct QueueState {
    phase: Phase,
    pending: VecDeque<Command>,
}

/// Shared handle to the command queue
#[derive(Clone)]
pub struct CommandQueue {
    state: Arc<Mutex<QueueState>>,
    identity: Option<IdentityStore>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                phase: Phase::Buffering,
                pending: VecDeque::new(),
            })),
            identity: None,
        }
    }

    /// Queue that reads the user identifier from `storage` until booted
    pub fn with_storage(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            identity: Some(IdentityStore::new(storage)),
            ..Self::new()
        }
    }

    /// Queue `command`, or run it if the tracker is ready.
    pub async fn dispatch(&self, command: Command) -> Result<Dispatched> {
        let tracker = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match &state.phase {
                Phase::Ready(tracker) => tracker.clone(),
                Phase::Buffering | Phase::Draining => {
                    tracing::debug!(command = command.name(), "Queueing command");
                    state.pending.push_back(command);
                    return Ok(Dispatched::Queued);
                }
            }
        };

        command.execute(&tracker).await?;
        Ok(Dispatched::Executed)
    }

    /// Number of commands waiting
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether commands now run directly
    pub fn is_ready(&self) -> bool {
        matches!(self.lock().phase, Phase::Ready(_))
    }

    /// Stored user identifier.
    ///
    /// Before boot this reads the queue's session storage, or returns `None`
    /// for a queue without one.
    pub fn user_identifier(&self) -> Option<String> {
        let tracker = match &self.lock().phase {
            Phase::Ready(tracker) => Some(tracker.clone()),
            Phase::Buffering | Phase::Draining => None,
        };
        match tracker {
            Some(tracker) => tracker.user_identifier(),
            None => self.identity.as_ref()?.user_identifier(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Attributes of the embedding element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptAttributes {
    values: HashMap<String, String>,
}

impl ScriptAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Value of `name`; empty values count as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// `"false"` disables, any other value enables.
    fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).map(|v| v != "false")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ScriptAttributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = Self::new();
        for (name, value) in iter {
            attributes.insert(name, value);
        }
        attributes
    }
}

/// Merge declarative attributes over the pre-set options.
///
/// Malformed `data-mask-paths` JSON is logged and ignored.
pub fn resolve_options(preset: Option<Options>, attributes: Option<&ScriptAttributes>) -> Options {
    let mut options = preset.unwrap_or_default();
    let attributes = match attributes {
        Some(attributes) => attributes,
        None => return options,
    };

    if let Some(token) = attributes.get("data-token") {
        options.token = token.to_string();
    }
    if let Some(host) = attributes.get("data-host") {
        options.host = Some(host.to_string());
    }
    if let Some(allow) = attributes.flag("data-allow-cookies") {
        options.allow_cookies = Some(allow);
    }
    if let Some(track) = attributes.flag("data-track-page-views") {
        options.track_page_views = Some(track);
    }
    if let Some(track) = attributes.flag("data-track-outbound-links") {
        options.track_outbound_links = Some(track);
    }
    if let Some(track) = attributes.flag("data-track-data-attributes") {
        options.track_data_attributes = Some(track);
    }
    if let Some(raw) = attributes.get("data-mask-paths") {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(mask_paths) => options.mask_paths = Some(mask_paths),
            Err(e) => tracing::warn!(value = %raw, error = %e, "Failed to parse mask paths"),
        }
    }

    options
}

/// What [`Loader::boot`] did
#[derive(Debug)]
pub struct BootOutcome {
    /// Whether `init` newly initialized the tracker
    pub initialized: bool,
    /// Queued commands that failed, in execution order
    pub failures: Vec<(&'static str, Error)>,
}

/// Boots a tracker and hands it the queued commands
pub struct Loader {
    queue: CommandQueue,
}

impl Loader {
    pub fn new(queue: CommandQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Initialize `tracker` and drain the queue in FIFO order.
    ///
    /// Fails without touching the queue if the options are invalid, so a
    /// later boot can still drain it. Failures of queued commands are
    /// logged, collected in the outcome and do not stop the drain.
    pub async fn boot(
        &self,
        tracker: Tracker,
        preset: Option<Options>,
        attributes: Option<&ScriptAttributes>,
    ) -> Result<BootOutcome> {
        if !matches!(self.queue.lock().phase, Phase::Buffering) {
            return Err(Error::Config("command queue already booted".to_string()));
        }

        let initialized = tracker.init(resolve_options(preset, attributes)).await?;
        self.queue.lock().phase = Phase::Draining;
        tracing::debug!(queued = self.queue.len(), "Draining command queue");

        let mut failures = Vec::new();

        loop {
            let command = {
                let mut state = self.queue.lock();
                match state.pending.pop_front() {
                    Some(command) => command,
                    None => {
                        state.phase = Phase::Ready(tracker.clone());
                        break;
                    }
                }
            };

            let name = command.name();
            if let Err(e) = command.execute(&tracker).await {
                tracing::warn!(command = name, error = %e, "Queued command failed");
                failures.push((name, e));
            }
        }

        Ok(BootOutcome {
            initialized,
            failures,
        })
    }
}
