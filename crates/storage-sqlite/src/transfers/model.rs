//! Database models for transfer records.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use tandem_core::transfers::{Download, Upload};
use tandem_core::{Error, Result};

use crate::db::{enum_from_db, enum_to_db};

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
#[diesel(primary_key(file_id))]
#[diesel(table_name = crate::schema::uploads)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UploadDB {
    pub file_id: String,
    pub workspace_id: String,
    pub upload_id: String,
    pub status: String,
    pub progress: i32,
    pub retries: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub completed_at: Option<String>,
}

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
#[diesel(primary_key(file_id))]
#[diesel(table_name = crate::schema::downloads)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DownloadDB {
    pub file_id: String,
    pub workspace_id: String,
    pub download_id: String,
    pub path: String,
    pub download_type: String,
    pub status: String,
    pub progress: i32,
    pub retries: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub completed_at: Option<String>,
}

impl UploadDB {
    pub fn from_domain(upload: &Upload) -> Result<Self> {
        Ok(Self {
            file_id: upload.file_id.clone(),
            workspace_id: upload.workspace_id.clone(),
            upload_id: upload.upload_id.clone(),
            status: enum_to_db(&upload.status)?,
            progress: upload.progress,
            retries: upload.retries,
            error_code: upload.error_code.clone(),
            error_message: upload.error_message.clone(),
            created_at: upload.created_at.clone(),
            updated_at: upload.updated_at.clone(),
            completed_at: upload.completed_at.clone(),
        })
    }
}

impl TryFrom<UploadDB> for Upload {
    type Error = Error;

    fn try_from(row: UploadDB) -> Result<Self> {
        Ok(Upload {
            status: enum_from_db(&row.status)?,
            file_id: row.file_id,
            workspace_id: row.workspace_id,
            upload_id: row.upload_id,
            progress: row.progress,
            retries: row.retries,
            error_code: row.error_code,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

impl DownloadDB {
    pub fn from_domain(download: &Download) -> Result<Self> {
        Ok(Self {
            file_id: download.file_id.clone(),
            workspace_id: download.workspace_id.clone(),
            download_id: download.download_id.clone(),
            path: download.path.clone(),
            download_type: enum_to_db(&download.download_type)?,
            status: enum_to_db(&download.status)?,
            progress: download.progress,
            retries: download.retries,
            error_code: download.error_code.clone(),
            error_message: download.error_message.clone(),
            created_at: download.created_at.clone(),
            updated_at: download.updated_at.clone(),
            completed_at: download.completed_at.clone(),
        })
    }
}

impl TryFrom<DownloadDB> for Download {
    type Error = Error;

    fn try_from(row: DownloadDB) -> Result<Self> {
        Ok(Download {
            download_type: enum_from_db(&row.download_type)?,
            status: enum_from_db(&row.status)?,
            file_id: row.file_id,
            workspace_id: row.workspace_id,
            download_id: row.download_id,
            path: row.path,
            progress: row.progress,
            retries: row.retries,
            error_code: row.error_code,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}
