pub mod google;

use crate::error::Result;
use crate::types::DriveFile;
use async_trait::async_trait;

pub use google::{GoogleDriveClient, ListStrategy, LIST_STRATEGIES};

/// Remote folder listing and file download
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// List every file directly inside a folder, walking all pages.
    async fn list_files_in_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>>;

    /// Fetch the file's text content (spreadsheets are exported as CSV).
    async fn download_file(&self, file: &DriveFile) -> Result<String>;
}
