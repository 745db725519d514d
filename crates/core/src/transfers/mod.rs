//! File uploads and downloads.

mod transfers_jobs;
mod transfers_model;
mod transfers_service;
mod transfers_traits;

pub use transfers_jobs::*;
pub use transfers_model::*;
pub use transfers_service::*;
pub use transfers_traits::*;

#[cfg(test)]
mod tests;
