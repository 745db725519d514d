//! Iterative ancestor lookup.
//!
//! Parent links live in row data, so nothing structurally prevents a cycle.
//! The walk carries a visited set and a depth bound and rejects either.

use std::collections::HashSet;

use crate::errors::{Error, Result, ValidationError};

use super::Node;

pub const MAX_ANCESTOR_DEPTH: usize = 64;

/// Walks from `start_id` up to the root through `lookup`, returning the chain
/// ordered root first (so `start_id` is last).
pub fn collect_ancestors<F>(start_id: &str, mut lookup: F) -> Result<Vec<Node>>
where
    F: FnMut(&str) -> Result<Option<Node>>,
{
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(start_id.to_string());

    while let Some(id) = current.take() {
        if !visited.insert(id.clone()) || chain.len() >= MAX_ANCESTOR_DEPTH {
            return Err(ValidationError::MalformedAncestry(start_id.to_string()).into());
        }

        let node = lookup(&id)?.ok_or_else(|| Error::not_found(format!("Node {}", id)))?;
        current = node.parent_id.clone();
        chain.push(node);
    }

    chain.reverse();
    Ok(chain)
}
