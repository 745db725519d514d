//! Per-user interaction rows and the pending event log.

mod model;
mod repository;

pub use model::{InteractionDB, InteractionEventDB};
pub use repository::InteractionRepository;
