//! Durable background job scheduler.

mod jobs_model;
mod jobs_service;
mod jobs_traits;
mod registry;
pub mod sleep_scheduler;
pub mod triggers;

pub use jobs_model::*;
pub use jobs_service::*;
pub use jobs_traits::*;
pub use registry::*;
