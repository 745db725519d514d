//! Per-user interaction state (seen/opened markers) and its pending event log.

mod interactions_model;
mod interactions_service;
mod interactions_traits;
pub mod merge;

pub use interactions_model::*;
pub use interactions_service::*;
pub use interactions_traits::*;
