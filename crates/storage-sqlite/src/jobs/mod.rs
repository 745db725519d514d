//! Durable jobs and recurring schedules.

mod model;
mod repository;

pub use model::{JobDB, JobScheduleDB};
pub use repository::JobRepository;
