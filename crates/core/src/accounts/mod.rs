//! Accounts, servers and revoked tokens.

mod accounts_jobs;
mod accounts_model;
mod accounts_service;
mod accounts_traits;

pub use accounts_jobs::*;
pub use accounts_model::*;
pub use accounts_service::*;
pub use accounts_traits::*;
