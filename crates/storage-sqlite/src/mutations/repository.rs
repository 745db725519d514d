use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;

use tandem_core::mutations::{Mutation, MutationRepositoryTrait, NewMutation};
use tandem_core::Result;

use super::model::MutationDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::mutations;

/// Appends one change record. Must run inside the writer transaction that
/// also writes the entity the record describes.
pub fn insert_mutation(conn: &mut SqliteConnection, mutation: &NewMutation) -> Result<()> {
    let row = MutationDB::from_new(mutation)?;
    diesel::insert_into(mutations::table)
        .values(&row)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

pub struct MutationRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl MutationRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl MutationRepositoryTrait for MutationRepository {
    fn list_pending_mutations(&self, workspace_id: &str, limit: i64) -> Result<Vec<Mutation>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = mutations::table
            .filter(mutations::workspace_id.eq(workspace_id))
            .order(mutations::id.asc())
            .limit(limit)
            .select(MutationDB::as_select())
            .load::<MutationDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(Mutation::try_from).collect()
    }

    fn count_mutations_for_node(&self, node_id: &str) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let count = mutations::table
            .filter(mutations::node_id.eq(node_id))
            .count()
            .get_result::<i64>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(count)
    }

    async fn delete_mutations(&self, ids: Vec<String>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let deleted = diesel::delete(mutations::table.filter(mutations::id.eq_any(&ids)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(deleted)
            })
            .await
    }

    async fn mark_mutations_failed(&self, ids: Vec<String>, max_retries: i32) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                diesel::update(mutations::table.filter(mutations::id.eq_any(&ids)))
                    .set(mutations::retries.eq(mutations::retries + 1))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                let dropped = diesel::delete(
                    mutations::table
                        .filter(mutations::id.eq_any(&ids))
                        .filter(mutations::retries.ge(max_retries)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                if dropped > 0 {
                    log::warn!(
                        "[Mutations] Dropped {} change record(s) after {} failed pushes",
                        dropped,
                        max_retries
                    );
                }
                Ok(dropped)
            })
            .await
    }
}
