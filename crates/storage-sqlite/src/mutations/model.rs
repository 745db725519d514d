//! Database model for outbox rows.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use tandem_core::mutations::{Mutation, MutationData, NewMutation};
use tandem_core::Result;

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::mutations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MutationDB {
    pub id: String,
    pub workspace_id: String,
    pub mutation_type: String,
    pub node_id: String,
    pub data: String,
    pub created_at: String,
    pub retries: i32,
}

impl MutationDB {
    pub fn from_new(mutation: &NewMutation) -> Result<Self> {
        Ok(Self {
            id: mutation.id.clone(),
            workspace_id: mutation.workspace_id.clone(),
            mutation_type: mutation.data.mutation_type().as_str().to_string(),
            node_id: mutation.node_id().to_string(),
            data: serde_json::to_string(&mutation.data)?,
            created_at: mutation.created_at.clone(),
            retries: 0,
        })
    }
}

impl TryFrom<MutationDB> for Mutation {
    type Error = tandem_core::Error;

    fn try_from(row: MutationDB) -> Result<Self> {
        let data: MutationData = serde_json::from_str(&row.data)?;
        Ok(Mutation {
            id: row.id,
            workspace_id: row.workspace_id,
            node_id: row.node_id,
            data,
            created_at: row.created_at,
            retries: row.retries,
        })
    }
}
