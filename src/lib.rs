//! `egressor` manages the egress side of outbound HTTP: it hands out
//! ready-to-use clients while rotating among a pool of configured source
//! addresses and enforcing a minimum spacing between requests to the same
//! destination host.
//!
//! ```no_run
//! use std::time::Duration;
//! use egressor::{ConfigUpdate, EgressManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = EgressManager::new();
//!     manager.set_option(ConfigUpdate {
//!         addresses: vec!["10.0.0.1".into(), "10.0.0.2".into()],
//!         default_delay: Some(Duration::from_secs(1)),
//!         ..ConfigUpdate::default()
//!     });
//!
//!     // Waits out any required spacing, picks the next egress address and
//!     // returns a client bound to it.
//!     let client = manager.acquire_client("https://example.com", None, true).await?;
//!     let _response = client.get("https://example.com").send().await;
//!     Ok(())
//! }
//! ```
//!
//! The manager coordinates three independently-lockable registries (host
//! delay overrides, per-host dispatch state, per-address transport/cookie
//! resources) plus a configuration store. Rate limiting is reservation
//! based: a dispatch slot is claimed under the lock, the sleep happens
//! outside it, so concurrent callers targeting the same host queue
//! non-overlapping waits while other hosts proceed untouched.
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]

mod config;
mod cookies;
mod delay;
mod dispatch;
mod error;
mod host;
mod manager;
mod resource;

pub use config::{
    ConfigUpdate, EgressConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_REDIRECTS,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use error::{ErrorKind, Result};
pub use host::HostKey;
pub use manager::EgressManager;
