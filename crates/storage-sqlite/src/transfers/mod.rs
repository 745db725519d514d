//! Upload and download records.

mod model;
mod repository;

pub use model::{DownloadDB, UploadDB};
pub use repository::TransferRepository;
