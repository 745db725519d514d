//! Replicated document engine.
//!
//! Every node embeds a `yrs` document whose root map `attributes` holds the
//! node's top-level attributes. Each key is a last-writer-wins register inside
//! the CRDT, so applying the same set of updates in any order, any number of
//! times, converges on the same attribute bag.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use yrs::types::ToJson;
use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, Map as _, MapRef, ReadTxn, StateVector, Transact, Update};

use crate::errors::{DocumentError, Result};

const ATTRIBUTES_ROOT: &str = "attributes";

pub struct NodeDocument {
    id: String,
    doc: Doc,
    attributes: MapRef,
    /// State already accounted for by the last load/encode; the incremental
    /// update is everything past it.
    baseline: StateVector,
    dirty: bool,
}

impl std::fmt::Debug for NodeDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDocument")
            .field("id", &self.id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl NodeDocument {
    pub fn create(id: impl Into<String>) -> Self {
        let doc = Doc::new();
        let attributes = doc.get_or_insert_map(ATTRIBUTES_ROOT);
        Self {
            id: id.into(),
            doc,
            attributes,
            baseline: StateVector::default(),
            dirty: false,
        }
    }

    /// Rebuilds a document from its encoded full state. Bytes that do not
    /// decode are rejected instead of producing a partial attribute bag.
    pub fn load(id: impl Into<String>, state: &[u8]) -> Result<Self> {
        let id = id.into();
        let update = Update::decode_v1(state).map_err(|e| DocumentError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })?;

        let doc = Doc::new();
        let attributes = doc.get_or_insert_map(ATTRIBUTES_ROOT);
        let baseline = {
            let mut txn = doc.transact_mut();
            txn.apply_update(update).map_err(|e| DocumentError::Corrupt {
                id: id.clone(),
                reason: e.to_string(),
            })?;
            txn.state_vector()
        };

        let loaded = Self {
            id,
            doc,
            attributes,
            baseline,
            dirty: false,
        };
        if !matches!(loaded.attributes_any(), Any::Map(_)) {
            return Err(DocumentError::Corrupt {
                id: loaded.id.clone(),
                reason: "attributes root is not a map".to_string(),
            }
            .into());
        }
        Ok(loaded)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Makes the document's attributes equal to `attrs`. Only keys whose value
    /// differs are written, so re-applying the same attributes is a no-op.
    /// Returns whether anything changed.
    pub fn apply_attributes(&mut self, attrs: &Map<String, Value>) -> bool {
        let mut txn = self.doc.transact_mut();
        let current = match self.attributes.to_json(&txn) {
            Any::Map(entries) => entries,
            _ => Arc::new(HashMap::new()),
        };

        let mut changed = false;
        for (key, value) in attrs {
            let next = json_to_any(value);
            if current.get(key) != Some(&next) {
                self.attributes.insert(&mut txn, key.as_str(), next);
                changed = true;
            }
        }
        for key in current.keys() {
            if !attrs.contains_key(key) {
                self.attributes.remove(&mut txn, key);
                changed = true;
            }
        }

        self.dirty |= changed;
        changed
    }

    /// Merges a remote incremental update. Remote changes never count towards
    /// this document's own outgoing delta. Returns whether the update carried
    /// any item this document had not integrated yet.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<bool> {
        let decoded = Update::decode_v1(update).map_err(|e| DocumentError::InvalidUpdate {
            id: self.id.clone(),
            reason: e.to_string(),
        })?;
        let own_client = self.doc.client_id();
        let mut txn = self.doc.transact_mut();
        let before = txn.state_vector();
        txn.apply_update(decoded)
            .map_err(|e| DocumentError::InvalidUpdate {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;
        let after = txn.state_vector();
        for (client, clock) in after.iter() {
            if *client != own_client {
                self.baseline.set_max(*client, *clock);
            }
        }
        Ok(after != before)
    }

    pub fn encode_full_state(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Encodes local changes made since the last load or encode. `None` means
    /// there is nothing to transmit.
    pub fn encode_incremental_update(&mut self) -> Option<Vec<u8>> {
        let txn = self.doc.transact();
        let current = txn.state_vector();
        if !self.dirty && current == self.baseline {
            return None;
        }
        let update = txn.encode_diff_v1(&self.baseline);
        drop(txn);

        self.baseline = current;
        self.dirty = false;
        Some(update)
    }

    pub fn decode_attributes(&self) -> Map<String, Value> {
        match any_to_json(&self.attributes_any()) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn attributes_any(&self) -> Any {
        let txn = self.doc.transact();
        self.attributes.to_json(&txn)
    }
}

fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(flag) => Any::Bool(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Any::BigInt(int),
            None => Any::Number(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => Any::String(Arc::from(text.as_str())),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into()),
        Value::Object(entries) => Any::Map(Arc::new(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect(),
        )),
    }
}

fn any_to_json(value: &Any) -> Value {
    match value {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(flag) => Value::Bool(*flag),
        Any::Number(number) => Number::from_f64(*number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Any::BigInt(int) => Value::Number((*int).into()),
        Any::String(text) => Value::String(text.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
    }
}
