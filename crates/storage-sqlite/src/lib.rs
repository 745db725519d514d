//! SQLite persistence for Tandem.
//!
//! Reads go through an r2d2 pool; every write runs on the single writer
//! thread behind [`db::WriteHandle`], inside one transaction per call.

pub mod accounts;
pub mod db;
pub mod errors;
pub mod interactions;
pub mod jobs;
pub mod mutations;
pub mod nodes;
pub mod schema;
pub mod sync;
pub mod transfers;

pub use accounts::AccountRepository;
pub use db::{create_pool, get_connection, init, open, run_migrations, spawn_writer, DbPool, WriteHandle};
pub use errors::StorageError;
pub use interactions::InteractionRepository;
pub use jobs::JobRepository;
pub use mutations::MutationRepository;
pub use nodes::NodeRepository;
pub use sync::SyncCursorRepository;
pub use transfers::TransferRepository;
