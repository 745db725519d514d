//! Single writer for the SQLite database.
//!
//! SQLite allows one writer at a time. Instead of letting every repository
//! race for the write lock, all writes are funnelled through one dedicated
//! thread that owns a pooled connection and runs each job inside an
//! `IMMEDIATE` transaction. Callers await the result over a oneshot channel.

use diesel::sqlite::SqliteConnection;
use log::{error, warn};
use tokio::sync::{mpsc, oneshot};

use tandem_core::errors::{Error, Result};

use super::{DbConnection, DbPool};
use crate::errors::StorageError;

type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// Error carried through diesel's transaction API. Domain errors roll the
/// transaction back just like query errors do.
enum TxError {
    Domain(Error),
    Query(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Query(err)
    }
}

/// Cheap, cloneable handle to the writer thread.
#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::UnboundedSender<WriteJob>,
}

impl WriteHandle {
    /// Runs `job` on the writer inside one transaction. Everything the
    /// closure writes commits together or not at all.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel::<Result<T>>();
        let write: WriteJob = Box::new(move |conn: &mut SqliteConnection| {
            let outcome = conn
                .immediate_transaction::<T, TxError, _>(|tx| job(tx).map_err(TxError::Domain));
            let result = match outcome {
                Ok(value) => Ok(value),
                Err(TxError::Domain(err)) => Err(err),
                Err(TxError::Query(err)) => Err(StorageError::from(err).into()),
            };
            // The caller may have gone away; the write itself already settled.
            let _ = reply.send(result);
        });

        self.sender
            .send(write)
            .map_err(|_| StorageError::WriterClosed("writer thread stopped".to_string()))?;
        response
            .await
            .map_err(|_| StorageError::WriterClosed("writer dropped the reply".to_string()))?
    }
}

/// Starts the writer thread. It runs until every `WriteHandle` is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<WriteJob>();

    let spawned = std::thread::Builder::new()
        .name("tandem-db-writer".to_string())
        .spawn(move || {
            let mut conn: Option<DbConnection> = None;
            while let Some(job) = receiver.blocking_recv() {
                if conn.is_none() {
                    match pool.get() {
                        Ok(c) => conn = Some(c),
                        Err(e) => {
                            // Dropping the job drops its reply sender; the
                            // caller sees a writer error and may retry.
                            error!("[Storage] Writer could not get a connection: {}", e);
                            continue;
                        }
                    }
                }
                if let Some(c) = conn.as_mut() {
                    job(&mut **c);
                }
            }
        });

    if let Err(e) = spawned {
        warn!("[Storage] Failed to start writer thread: {}", e);
    }

    WriteHandle { sender }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations};
    use diesel::prelude::*;
    use diesel::sql_types::BigInt;
    use tandem_core::errors::ValidationError;

    #[derive(QueryableByName)]
    struct Count {
        #[diesel(sql_type = BigInt)]
        n: i64,
    }

    fn count_servers(pool: &DbPool) -> i64 {
        let mut conn = pool.get().expect("conn");
        diesel::sql_query("SELECT COUNT(*) AS n FROM servers")
            .get_result::<Count>(&mut conn)
            .expect("count")
            .n
    }

    #[tokio::test]
    async fn failed_job_rolls_back_its_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = init(dir.path().to_str().expect("utf8")).expect("init");
        run_migrations(&db_path).expect("migrate");
        let pool = create_pool(&db_path).expect("pool");
        let writer = spawn_writer(pool.as_ref().clone());

        let result: Result<()> = writer
            .exec(|conn| {
                diesel::sql_query(
                    "INSERT INTO servers (domain, name, version, available, created_at) \
                     VALUES ('a.test', 'A', '1', 1, '2026-01-01T00:00:00.000Z')",
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                Err(ValidationError::InvalidInput("abort".to_string()).into())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(count_servers(&pool), 0);

        writer
            .exec(|conn| {
                diesel::sql_query(
                    "INSERT INTO servers (domain, name, version, available, created_at) \
                     VALUES ('b.test', 'B', '1', 1, '2026-01-01T00:00:00.000Z')",
                )
                .execute(conn)
                .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .expect("commit");
        assert_eq!(count_servers(&pool), 1);
    }
}
