//! Tandem core: the local replica of a collaborative workspace and the
//! background engine that keeps it in step with the server.
//!
//! Storage and network access are reached through the repository traits and
//! [`remote::RemoteApi`]; `tandem-storage-sqlite` and `tandem-device-sync`
//! provide the implementations.

pub mod accounts;
pub mod config;
pub mod context;
pub mod document;
pub mod errors;
pub mod events;
pub mod files;
pub mod interactions;
pub mod jobs;
pub mod mutations;
pub mod nodes;
pub mod remote;
pub mod sync;
pub mod transfers;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
