//! Nodes: the replicated entities of a workspace.

pub mod ancestors;
mod nodes_model;
mod nodes_service;
mod nodes_traits;
pub mod permissions;
pub mod validation;

pub use nodes_model::*;
pub use nodes_service::*;
pub use nodes_traits::*;
