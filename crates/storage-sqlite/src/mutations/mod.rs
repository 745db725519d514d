//! Outbox of local change records.

mod model;
mod repository;

pub use model::MutationDB;
pub use repository::{insert_mutation, MutationRepository};
