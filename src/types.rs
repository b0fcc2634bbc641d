use serde::{Deserialize, Serialize};

/// One addressable contact extracted from a recipient source file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRecipient {
    pub address_id: Option<String>,
    pub address_line1: String,
    pub city: String,
    pub state_province_region: String,
    pub postal_code: String,
    pub market: String,
    pub sector: String,
    pub email: String,
    pub core_segment: String,
    pub sub_segment: String,
}

/// Descriptor for a file in the remote storage folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// A persisted campaign that recipients can be attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDownload {
    pub file_name: String,
    pub reason: String,
}

/// Outcome of one recipient sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRecipientSyncSummary {
    pub files_found: usize,
    pub files_matched: usize,
    pub recipients_parsed: usize,
    pub recipients_inserted: usize,
    pub unmatched_files: Vec<String>,
    pub failed_downloads: Vec<FailedDownload>,
}
