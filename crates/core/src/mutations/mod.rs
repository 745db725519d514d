//! Outbox of committed local mutations.

mod mutations_model;
mod mutations_traits;

pub use mutations_model::*;
pub use mutations_traits::*;
