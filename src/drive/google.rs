use super::DriveClient;
use crate::config::DriveConfig;
use crate::constants::{MIME_CSV, MIME_GOOGLE_SPREADSHEET};
use crate::error::{PortalError, Result};
use crate::types::DriveFile;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

/// One set of cross-drive flags to try when listing a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListStrategy {
    pub name: &'static str,
    pub params: &'static [(&'static str, &'static str)],
}

/// Listing falls through these in order; folders shared from a shared drive,
/// from My Drive, or via link each accept a different combination.
pub const LIST_STRATEGIES: [ListStrategy; 4] = [
    ListStrategy {
        name: "all_drives_corpora",
        params: &[
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
            ("corpora", "allDrives"),
        ],
    },
    ListStrategy {
        name: "all_drives",
        params: &[("supportsAllDrives", "true"), ("includeItemsFromAllDrives", "true")],
    },
    ListStrategy {
        name: "supports_all_drives",
        params: &[("supportsAllDrives", "true")],
    },
    ListStrategy { name: "plain", params: &[] },
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Google Drive v3 client authenticated with an API key
pub struct GoogleDriveClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    page_size: u32,
}

impl GoogleDriveClient {
    /// Fails before any network call when no API key is configured.
    pub fn new(config: &DriveConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: config.page_size.clamp(1, 1000),
        })
    }

    #[instrument(skip(self), fields(strategy = strategy.name))]
    async fn list_with_strategy(&self, folder_id: &str, strategy: &ListStrategy) -> Result<Vec<DriveFile>> {
        let url = format!("{}/files", self.base_url);
        let query = format!("'{}' in parents and trashed = false", folder_id);
        let page_size = self.page_size.to_string();

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(&url)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", "nextPageToken, files(id, name, mimeType)"),
                    ("pageSize", page_size.as_str()),
                    ("key", self.api_key.as_str()),
                ])
                .query(strategy.params);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let resp = request.send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(PortalError::Drive {
                    message: format!(
                        "listing folder {} failed with status {}: {}",
                        folder_id,
                        status.as_u16(),
                        truncate(&body, 300)
                    ),
                });
            }

            let page: FileListPage = resp.json().await?;
            debug!("Fetched page with {} files", page.files.len());
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    fn download_request(&self, file: &DriveFile) -> reqwest::RequestBuilder {
        if file.mime_type == MIME_GOOGLE_SPREADSHEET {
            self.client
                .get(format!("{}/files/{}/export", self.base_url, file.id))
                .query(&[("mimeType", MIME_CSV), ("key", self.api_key.as_str())])
        } else {
            self.client
                .get(format!("{}/files/{}", self.base_url, file.id))
                .query(&[
                    ("alt", "media"),
                    ("supportsAllDrives", "true"),
                    ("key", self.api_key.as_str()),
                ])
        }
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    #[instrument(skip(self))]
    async fn list_files_in_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let mut last_error = None;
        for strategy in LIST_STRATEGIES.iter() {
            match self.list_with_strategy(folder_id, strategy).await {
                Ok(files) => {
                    info!("Listed {} files using strategy {}", files.len(), strategy.name);
                    return Ok(files);
                }
                Err(e) => {
                    warn!("Listing strategy {} failed: {}", strategy.name, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| PortalError::Drive {
            message: format!("no listing strategy available for folder {}", folder_id),
        }))
    }

    #[instrument(skip(self, file), fields(file = %file.name))]
    async fn download_file(&self, file: &DriveFile) -> Result<String> {
        let resp = self
            .download_request(file)
            .send()
            .await
            .map_err(|e| PortalError::Download {
                file_name: file.name.clone(),
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PortalError::Download {
                file_name: file.name.clone(),
                status: Some(status.as_u16()),
                message: truncate(&body, 300).to_string(),
            });
        }

        resp.text().await.map_err(|e| PortalError::Download {
            file_name: file.name.clone(),
            status: Some(status.as_u16()),
            message: format!("failed to read body: {}", e),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
