use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;

use tandem_core::transfers::{
    Download, DownloadStatus, TransferFailure, TransferRepositoryTrait, Upload, UploadStatus,
};
use tandem_core::utils::time::now_db_timestamp;
use tandem_core::Result;

use super::model::{DownloadDB, UploadDB};
use crate::db::{enum_to_db, get_connection, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{downloads, uploads};

fn load_upload(conn: &mut SqliteConnection, file_id: &str) -> Result<Option<Upload>> {
    uploads::table
        .find(file_id)
        .select(UploadDB::as_select())
        .first::<UploadDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(Upload::try_from)
        .transpose()
}

fn load_download(conn: &mut SqliteConnection, file_id: &str) -> Result<Option<Download>> {
    downloads::table
        .find(file_id)
        .select(DownloadDB::as_select())
        .first::<DownloadDB>(conn)
        .optional()
        .map_err(StorageError::from)?
        .map(Download::try_from)
        .transpose()
}

pub struct TransferRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl TransferRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl TransferRepositoryTrait for TransferRepository {
    fn get_upload(&self, file_id: &str) -> Result<Option<Upload>> {
        let mut conn = get_connection(&self.pool)?;
        load_upload(&mut conn, file_id)
    }

    fn get_download(&self, file_id: &str) -> Result<Option<Download>> {
        let mut conn = get_connection(&self.pool)?;
        load_download(&mut conn, file_id)
    }

    fn list_failed_uploads(&self, workspace_id: &str) -> Result<Vec<Upload>> {
        let mut conn = get_connection(&self.pool)?;
        let failed = enum_to_db(&UploadStatus::Failed)?;
        let rows = uploads::table
            .filter(uploads::workspace_id.eq(workspace_id))
            .filter(uploads::status.eq(failed))
            .order(uploads::created_at.asc())
            .select(UploadDB::as_select())
            .load::<UploadDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(Upload::try_from).collect()
    }

    async fn create_download(&self, download: Download) -> Result<Download> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Download> {
                if let Some(existing) = load_download(conn, &download.file_id)? {
                    return Ok(existing);
                }
                let row = DownloadDB::from_domain(&download)?;
                diesel::insert_into(downloads::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(download)
            })
            .await
    }

    async fn update_upload_progress(
        &self,
        file_id: &str,
        status: UploadStatus,
        progress: i32,
    ) -> Result<Option<Upload>> {
        let file_id = file_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<Upload>> {
                let now = now_db_timestamp();
                let completed_at = (status == UploadStatus::Completed).then(|| now.clone());
                let updated = diesel::update(uploads::table.find(&file_id))
                    .set((
                        uploads::status.eq(enum_to_db(&status)?),
                        uploads::progress.eq(progress),
                        uploads::updated_at.eq(Some(now)),
                        uploads::completed_at.eq(completed_at),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Ok(None);
                }
                load_upload(conn, &file_id)
            })
            .await
    }

    async fn update_download_progress(
        &self,
        file_id: &str,
        status: DownloadStatus,
        progress: i32,
    ) -> Result<Option<Download>> {
        let file_id = file_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<Download>> {
                let now = now_db_timestamp();
                let completed_at = (status == DownloadStatus::Completed).then(|| now.clone());
                let updated = diesel::update(downloads::table.find(&file_id))
                    .set((
                        downloads::status.eq(enum_to_db(&status)?),
                        downloads::progress.eq(progress),
                        downloads::updated_at.eq(Some(now)),
                        downloads::completed_at.eq(completed_at),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Ok(None);
                }
                load_download(conn, &file_id)
            })
            .await
    }

    async fn record_upload_failure(&self, failure: TransferFailure) -> Result<Option<Upload>> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<Upload>> {
                let Some(current) = load_upload(conn, &failure.file_id)? else {
                    return Ok(None);
                };
                let (status, progress) = if failure.terminal {
                    (UploadStatus::Failed, 0)
                } else {
                    (UploadStatus::Pending, current.progress)
                };
                diesel::update(uploads::table.find(&failure.file_id))
                    .set((
                        uploads::status.eq(enum_to_db(&status)?),
                        uploads::progress.eq(progress),
                        uploads::retries.eq(failure.retries),
                        uploads::error_code.eq(Some(failure.error_code.clone())),
                        uploads::error_message.eq(Some(failure.error_message.clone())),
                        uploads::updated_at.eq(Some(now_db_timestamp())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                load_upload(conn, &failure.file_id)
            })
            .await
    }

    async fn record_download_failure(&self, failure: TransferFailure) -> Result<Option<Download>> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Option<Download>> {
                let Some(current) = load_download(conn, &failure.file_id)? else {
                    return Ok(None);
                };
                let (status, progress) = if failure.terminal {
                    (DownloadStatus::Failed, 0)
                } else {
                    (DownloadStatus::Pending, current.progress)
                };
                diesel::update(downloads::table.find(&failure.file_id))
                    .set((
                        downloads::status.eq(enum_to_db(&status)?),
                        downloads::progress.eq(progress),
                        downloads::retries.eq(failure.retries),
                        downloads::error_code.eq(Some(failure.error_code.clone())),
                        downloads::error_message.eq(Some(failure.error_message.clone())),
                        downloads::updated_at.eq(Some(now_db_timestamp())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                load_download(conn, &failure.file_id)
            })
            .await
    }

    async fn delete_upload(&self, file_id: &str) -> Result<()> {
        let file_id = file_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::delete(uploads::table.find(file_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn delete_download(&self, file_id: &str) -> Result<()> {
        let file_id = file_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::delete(downloads::table.find(file_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}
