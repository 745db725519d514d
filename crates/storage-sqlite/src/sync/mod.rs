//! Per-user replication cursors.

mod model;
mod repository;

pub use model::SyncCursorDB;
pub use repository::SyncCursorRepository;
