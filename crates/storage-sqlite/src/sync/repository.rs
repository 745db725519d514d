use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use log::debug;

use tandem_core::sync::{SyncConsumerType, SyncCursorRepositoryTrait};
use tandem_core::Result;

use super::model::SyncCursorDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::sync_cursors;

pub struct SyncCursorRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl SyncCursorRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl SyncCursorRepositoryTrait for SyncCursorRepository {
    fn get_cursor(&self, user_id: &str, consumer: SyncConsumerType) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let cursor = sync_cursors::table
            .find((user_id, consumer.as_str()))
            .select(sync_cursors::cursor)
            .first::<i64>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(cursor.unwrap_or(0))
    }

    async fn set_cursor(&self, user_id: &str, consumer: SyncConsumerType, cursor: i64) -> Result<()> {
        let row = SyncCursorDB {
            user_id: user_id.to_string(),
            consumer_type: consumer.as_str().to_string(),
            cursor,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let stored = sync_cursors::table
                    .find((&row.user_id, &row.consumer_type))
                    .select(sync_cursors::cursor)
                    .first::<i64>(conn)
                    .optional()
                    .map_err(StorageError::from)?;
                if stored.is_some_and(|current| current >= row.cursor) {
                    debug!(
                        "[Storage] Ignoring cursor {} for {}/{}, already at {:?}",
                        row.cursor, row.user_id, row.consumer_type, stored
                    );
                    return Ok(());
                }
                diesel::insert_into(sync_cursors::table)
                    .values(&row)
                    .on_conflict((sync_cursors::user_id, sync_cursors::consumer_type))
                    .do_update()
                    .set((
                        sync_cursors::cursor.eq(row.cursor),
                        sync_cursors::updated_at.eq(&row.updated_at),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}
