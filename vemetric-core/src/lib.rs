//! # vemetric-core
//!
//! Event tracking client for the Vemetric collection endpoint.
//!
//! This library provides:
//! - A tracking client for page views, custom events, outbound links and
//!   user identity
//! - URL masking so sensitive path segments never leave the page
//! - Session-scoped context ids and user identity
//! - Awaited and fire-and-forget delivery over HTTP
//! - A command queue that buffers calls made before the client boots
//!
//! ## Architecture
//!
//! ```text
//! caller ──► CommandQueue / Loader ──► Tracker ──► Dispatcher ──► Transport ──► endpoint
//!                                        │
//!                      ┌─────────────────┼──────────────────┐
//!                      ▼                 ▼                  ▼
//!                 mask_url         IdentityStore          retry
//! ```
//!
//! Nothing is batched or persisted: every call becomes one request or beacon.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vemetric_core::{
//!     EventProps, HttpTransport, MemoryStorage, Options, PageSnapshot, SuppressionConfig,
//!     Tracker, TransportConfig,
//! };
//!
//! # async fn run() -> vemetric_core::Result<()> {
//! let tracker = Tracker::new(
//!     Arc::new(PageSnapshot::new("https://example.com/pricing")),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(HttpTransport::new(&TransportConfig::default())?),
//!     SuppressionConfig::default(),
//! );
//!
//! tracker.init(Options::with_token("my-project-token")).await?;
//! tracker
//!     .track_event("Signup", EventProps::new().data("plan", "pro"))
//!     .await?;
//! tracker.flush().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use boot::{
    resolve_options, BootOutcome, Command, CommandQueue, Dispatched, Loader, ScriptAttributes,
};
pub use client::{NavigationKind, Tracker};
pub use config::{Config, Options, SuppressionConfig, TrackerConfig, TransportConfig};
pub use error::{Error, Result};
pub use identity::{FileStorage, IdentityStore, MemoryStorage, SessionStorage};
pub use page::{ClickEvent, Element, Page, PageSnapshot};
pub use payload::{EventProps, IdentifyProps, UserData};
pub use transport::{HttpTransport, RecordingTransport, Transport};

// Public modules
pub mod boot;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod masking;
pub mod page;
pub mod payload;
pub mod retry;
pub mod suppression;
pub mod transport;
