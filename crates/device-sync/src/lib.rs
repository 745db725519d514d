//! HTTP client a device uses to reach its Tandem server.
//!
//! [`DeviceSyncClient`] implements [`tandem_core::remote::RemoteApi`]: server
//! config and reachability, account refresh, outbox push, token revocation and
//! resumable file transfers.

pub mod client;
pub mod error;
pub mod types;

pub use client::DeviceSyncClient;
pub use error::{ApiRetryClass, DeviceSyncError, Result};
