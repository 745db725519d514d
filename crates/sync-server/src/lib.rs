//! Server side of the sync socket.
//!
//! Every connected device gets a [`connection`] actor that tracks one
//! [`consumer::SyncConsumer`] per `(user, stream)` and pushes replication
//! batches whenever a client cursor or a domain event says there may be
//! something new. There is no periodic polling.

pub mod connection;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod server;
pub mod source;

pub use connection::ConnectionHandle;
pub use consumer::{ConsumerState, SyncConsumer};
pub use error::{Result, SyncServerError};
pub use memory::MemorySyncSource;
pub use server::SyncServer;
pub use source::{InteractionWriter, SyncRecordSource, SyncUser};
