//! HTTP transport backed by reqwest

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::error::{Error, Result};

use super::{DeliveryResponse, OutgoingRequest, Transport};

/// Sends requests with a shared `reqwest::Client`.
///
/// Beacons run as spawned tasks; [`Transport::flush`] waits for them, which
/// short-lived hosts should do before their runtime shuts down.
pub struct HttpTransport {
    http_client: reqwest::Client,
    pending_beacons: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            pending_beacons: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: OutgoingRequest) -> Result<DeliveryResponse> {
        let mut builder = self.http_client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(0, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        Ok(DeliveryResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }

    fn beacon(&self, request: OutgoingRequest) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!(url = %request.url, "No async runtime, dropping beacon");
                return;
            }
        };

        let http_client = self.http_client.clone();
        let task = runtime.spawn(async move {
            match http_client.post(&request.url).json(&request.body).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::debug!(url = %request.url, status = %response.status(), "Beacon rejected");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(url = %request.url, error = %e, "Beacon failed"),
            }
        });

        if let Ok(mut pending) = self.pending_beacons.lock() {
            pending.retain(|t| !t.is_finished());
            pending.push(task);
        }
    }

    async fn flush(&self) {
        let tasks: Vec<JoinHandle<()>> = match self.pending_beacons.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };

        for task in tasks {
            let _ = task.await;
        }
    }
}
