//! Replication records, the client side of the sync socket and outbox push.

mod mutations_sync;
mod sync_model;
mod sync_retry;
mod sync_service;
mod sync_traits;

pub use mutations_sync::*;
pub use sync_model::*;
pub use sync_retry::*;
pub use sync_service::*;
pub use sync_traits::*;
