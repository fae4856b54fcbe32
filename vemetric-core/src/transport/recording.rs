//! In-memory transport that records traffic instead of sending it

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::Result;

use super::{DeliveryResponse, OutgoingRequest, Transport};

/// Records every request and beacon.
///
/// Responses are `200 OK` unless a path was configured with [`fail`], and
/// requests to a path configured with [`hold`] wait until the returned
/// [`Notify`] is signalled.
///
/// [`fail`]: RecordingTransport::fail
/// [`hold`]: RecordingTransport::hold
#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<OutgoingRequest>>,
    beacons: Mutex<Vec<OutgoingRequest>>,
    failures: Mutex<HashMap<String, (u16, String)>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests whose URL ends in `path` with this status.
    pub fn fail(&self, path: &str, status: u16, status_text: &str) {
        lock(&self.failures).insert(path.to_string(), (status, status_text.to_string()));
    }

    /// Keep requests whose URL ends in `path` pending until notified.
    pub fn hold(&self, path: &str) -> Arc<Notify> {
        lock(&self.holds)
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Requests sent so far, in order
    pub fn requests(&self) -> Vec<OutgoingRequest> {
        lock(&self.requests).clone()
    }

    /// Requests sent to URLs ending in `path`
    pub fn requests_to(&self, path: &str) -> Vec<OutgoingRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.ends_with(path))
            .cloned()
            .collect()
    }

    /// Beacons fired so far, in order
    pub fn beacons(&self) -> Vec<OutgoingRequest> {
        lock(&self.beacons).clone()
    }

    fn matching<T: Clone>(map: &Mutex<HashMap<String, T>>, url: &str) -> Option<T> {
        lock(map)
            .iter()
            .find(|(path, _)| url.ends_with(path.as_str()))
            .map(|(_, value)| value.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post(&self, request: OutgoingRequest) -> Result<DeliveryResponse> {
        let url = request.url.clone();
        lock(&self.requests).push(request);

        let hold = Self::matching(&self.holds, &url);
        if let Some(gate) = hold {
            gate.notified().await;
        }

        let response = match Self::matching(&self.failures, &url) {
            Some((status, status_text)) => DeliveryResponse {
                status,
                status_text,
                body: String::new(),
            },
            None => DeliveryResponse {
                status: 200,
                status_text: "OK".to_string(),
                body: "{}".to_string(),
            },
        };
        Ok(response)
    }

    fn beacon(&self, request: OutgoingRequest) {
        lock(&self.beacons).push(request);
    }
}
