//! Delivery of payloads to the collection endpoint
//!
//! Two paths exist:
//! - [`Dispatcher::send_request`]: an awaited POST whose non-2xx status or
//!   network failure is returned to the caller
//! - [`Dispatcher::send_beacon`]: one-way, best-effort delivery for moments
//!   when the page may be gone before a response arrives
//!
//! Both attach the common header set and skip suppressed environments.
//! The wire itself sits behind the [`Transport`] trait so hosts and tests
//! can swap out [`HttpTransport`].

mod http;
mod recording;

pub use http::HttpTransport;
pub use recording::RecordingTransport;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::page::Page;
use crate::suppression::Suppression;

pub const TOKEN_HEADER: &str = "Token";
pub const ALLOW_COOKIES_HEADER: &str = "Allow-Cookies";
pub const HOST_HEADER: &str = "V-Host";
pub const SDK_HEADER: &str = "V-SDK";
pub const SDK_VERSION_HEADER: &str = "V-SDK-Version";
pub const REFERRER_HEADER: &str = "v-referrer";

/// Header name to value
pub type Headers = BTreeMap<String, String>;

/// A fully resolved POST
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Value,
}

/// Status line and body of a response, whatever its status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl DeliveryResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Moves requests over the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send and wait for the response.
    ///
    /// Returns the response for any HTTP status; `Err` only for failures
    /// where no response exists (network errors, timeouts).
    async fn post(&self, request: OutgoingRequest) -> Result<DeliveryResponse>;

    /// Send without waiting or reporting anything back.
    fn beacon(&self, request: OutgoingRequest);

    /// Wait for outstanding beacons
    async fn flush(&self) {}
}

/// Applies endpoint, headers and suppression on top of a [`Transport`]
pub struct Dispatcher {
    host: String,
    token: String,
    allow_cookies: bool,
    sdk: Option<String>,
    sdk_version: Option<String>,
    page: Arc<dyn Page>,
    suppression: Suppression,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        config: &TrackerConfig,
        page: Arc<dyn Page>,
        suppression: Suppression,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            host: config.host.clone(),
            token: config.token.clone(),
            allow_cookies: config.allow_cookies,
            sdk: config.sdk.clone(),
            sdk_version: config.sdk_version.clone(),
            page,
            suppression,
            transport,
        }
    }

    /// `<host><path>`, resolved against the page URL for relative hosts.
    pub fn endpoint(&self, path: &str) -> Result<String> {
        let target = format!("{}{}", self.host, path);
        if self.is_relative_host() {
            Ok(Url::parse(&self.page.href())?.join(&target)?.to_string())
        } else {
            Ok(target)
        }
    }

    /// Headers sent with every request
    pub fn common_headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(TOKEN_HEADER.to_string(), self.token.clone());
        headers.insert(
            ALLOW_COOKIES_HEADER.to_string(),
            self.allow_cookies.to_string(),
        );
        if let Some(host) = self.originating_host() {
            headers.insert(HOST_HEADER.to_string(), host);
        }
        if let Some(sdk) = &self.sdk {
            headers.insert(SDK_HEADER.to_string(), sdk.clone());
        }
        if let Some(version) = &self.sdk_version {
            headers.insert(SDK_VERSION_HEADER.to_string(), version.clone());
        }
        headers
    }

    /// POST `payload` and wait for a 2xx response.
    ///
    /// Suppressed environments resolve with `None` without sending.
    pub async fn send_request(
        &self,
        path: &str,
        payload: Value,
        extra_headers: Headers,
    ) -> Result<Option<DeliveryResponse>> {
        if self.suppression.should_ignore(self.page.as_ref()) {
            tracing::debug!(path, "Request suppressed in this environment");
            return Ok(None);
        }

        let mut headers = self.common_headers();
        headers.extend(extra_headers);

        let request = OutgoingRequest {
            url: self.endpoint(path)?,
            headers,
            body: payload,
        };

        let response = self.transport.post(request).await?;
        if response.is_success() {
            Ok(Some(response))
        } else {
            Err(Error::transport(response.status, response.status_text))
        }
    }

    /// Fire `payload` with the headers folded into the body.
    pub fn send_beacon(&self, path: &str, payload: Value, extra_headers: Headers) {
        if self.suppression.should_ignore(self.page.as_ref()) {
            tracing::debug!(path, "Beacon suppressed in this environment");
            return;
        }

        let url = match self.endpoint(path) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(path, error = %e, "Dropping beacon with unresolvable endpoint");
                return;
            }
        };

        let mut body = match payload {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        let mut headers = self.common_headers();
        headers.extend(extra_headers);
        for (name, value) in headers {
            body.insert(name, Value::String(value));
        }

        self.transport.beacon(OutgoingRequest {
            url,
            headers: Headers::new(),
            body: Value::Object(body),
        });
    }

    /// Wait for outstanding beacons
    pub async fn flush(&self) {
        self.transport.flush().await;
    }

    fn is_relative_host(&self) -> bool {
        self.host.starts_with('/')
    }

    /// Host of the endpoint, or of the page for relative hosts, without `www.`
    fn originating_host(&self) -> Option<String> {
        let source = if self.is_relative_host() {
            self.page.href()
        } else {
            self.host.clone()
        };
        let url = Url::parse(&source).ok()?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return None,
        };
        Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
    }
}
