use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;

use tandem_core::interactions::{
    Interaction, InteractionEvent, InteractionRepositoryTrait,
    LocalInteractionWrite, ServerInteractionWrite,
};
use tandem_core::Result;

use super::model::{InteractionDB, InteractionEventDB};
use crate::db::{enum_to_db, get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{interaction_events, interactions};

fn stored_version(
    conn: &mut SqliteConnection,
    node_id: &str,
    collaborator_id: &str,
) -> Result<Option<i64>> {
    let version = interactions::table
        .find((node_id, collaborator_id))
        .select(interactions::version)
        .first::<i64>(conn)
        .optional()
        .map_err(StorageError::from)?;
    Ok(version)
}

/// Inserts or overwrites the row, but only while the stored version still
/// matches `expected_version`. Returns whether the row was written.
fn write_interaction_row(
    conn: &mut SqliteConnection,
    interaction: &Interaction,
    expected_version: Option<i64>,
) -> Result<bool> {
    let current = stored_version(conn, &interaction.node_id, &interaction.collaborator_id)?;
    if current != expected_version {
        return Ok(false);
    }
    let row = InteractionDB::from_domain(interaction)?;
    match expected_version {
        None => {
            diesel::insert_into(interactions::table)
                .values(&row)
                .execute(conn)
                .map_err(StorageError::from)?;
        }
        Some(version) => {
            let updated = diesel::update(
                interactions::table
                    .filter(interactions::node_id.eq(&row.node_id))
                    .filter(interactions::collaborator_id.eq(&row.collaborator_id))
                    .filter(interactions::version.eq(version)),
            )
            .set((
                interactions::root_id.eq(&row.root_id),
                interactions::workspace_id.eq(&row.workspace_id),
                interactions::attributes.eq(&row.attributes),
                interactions::version.eq(row.version),
                interactions::server_revision.eq(row.server_revision),
                interactions::updated_at.eq(row.updated_at.clone()),
            ))
            .execute(conn)
            .map_err(StorageError::from)?;
            if updated == 0 {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

pub struct InteractionRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl InteractionRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl InteractionRepositoryTrait for InteractionRepository {
    fn get_interaction(&self, node_id: &str, collaborator_id: &str) -> Result<Option<Interaction>> {
        let mut conn = get_connection(&self.pool)?;
        interactions::table
            .find((node_id, collaborator_id))
            .select(InteractionDB::as_select())
            .first::<InteractionDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?
            .map(Interaction::try_from)
            .transpose()
    }

    fn list_pending_events(&self, node_id: &str) -> Result<Vec<InteractionEvent>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = interaction_events::table
            .filter(interaction_events::node_id.eq(node_id))
            .order(interaction_events::created_at.asc())
            .select(InteractionEventDB::as_select())
            .load::<InteractionEventDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(InteractionEvent::try_from).collect()
    }

    fn list_events_to_send(&self, resend_before: &str, limit: i64) -> Result<Vec<InteractionEvent>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = interaction_events::table
            .filter(
                interaction_events::sent_at
                    .is_null()
                    .or(interaction_events::sent_at.lt(resend_before)),
            )
            .order(interaction_events::created_at.asc())
            .limit(limit)
            .select(InteractionEventDB::as_select())
            .load::<InteractionEventDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(InteractionEvent::try_from).collect()
    }

    async fn write_local_interaction(&self, write: LocalInteractionWrite) -> Result<bool> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                if !write_interaction_row(conn, &write.interaction, write.expected_version)? {
                    return Ok(false);
                }
                // Last write wins per (node, attribute); a rewritten event is
                // unsent again.
                let event = InteractionEventDB::from_domain(&write.event)?;
                diesel::insert_into(interaction_events::table)
                    .values(&event)
                    .on_conflict((interaction_events::node_id, interaction_events::attribute))
                    .do_update()
                    .set((
                        interaction_events::root_id.eq(&event.root_id),
                        interaction_events::value.eq(&event.value),
                        interaction_events::event_id.eq(&event.event_id),
                        interaction_events::created_at.eq(&event.created_at),
                        interaction_events::sent_at.eq(None::<String>),
                        interaction_events::sent_count.eq(0),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(true)
            })
            .await
    }

    async fn write_server_interaction(&self, write: ServerInteractionWrite) -> Result<bool> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<bool> {
                if !write_interaction_row(conn, &write.interaction, write.expected_version)? {
                    return Ok(false);
                }
                if !write.pruned_events.is_empty() {
                    let pruned = write
                        .pruned_events
                        .iter()
                        .map(enum_to_db)
                        .collect::<Result<Vec<String>>>()?;
                    diesel::delete(
                        interaction_events::table
                            .filter(interaction_events::node_id.eq(&write.interaction.node_id))
                            .filter(interaction_events::attribute.eq_any(pruned)),
                    )
                    .execute(conn)
                    .map_err(StorageError::from)?;
                }
                Ok(true)
            })
            .await
    }

    async fn mark_events_sent(&self, event_ids: Vec<String>, sent_at: String) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::update(
                    interaction_events::table.filter(interaction_events::event_id.eq_any(event_ids)),
                )
                .set((
                    interaction_events::sent_at.eq(Some(sent_at)),
                    interaction_events::sent_count.eq(interaction_events::sent_count + 1),
                ))
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}
