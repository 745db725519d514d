//! Nodes, their collaborations and the writes that append change records.

mod model;
mod repository;

pub use model::{CollaborationDB, NodeDB};
pub use repository::NodeRepository;
