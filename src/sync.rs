use crate::drive::DriveClient;
use crate::error::Result;
use crate::observability::metrics::sync as sync_metrics;
use crate::recipients::{dedupe_recipients, parse_recipients};
use crate::storage::Storage;
use crate::types::{Campaign, CampaignRecipientSyncSummary, DriveFile, FailedDownload};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// File name without a trailing extension. Only short alphanumeric suffixes
/// count as extensions, so `Q1.2024 Mailer` keeps its dot.
pub fn file_stem(name: &str) -> &str {
    let name = name.trim();
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Find the campaign a recipient file belongs to by name.
pub fn match_campaign<'a>(file_name: &str, campaigns: &'a [Campaign]) -> Option<&'a Campaign> {
    let stem = file_stem(file_name).trim().to_lowercase();
    let candidates = [stem.clone(), stem.replace('_', " "), stem.replace(' ', "_")];
    campaigns.iter().find(|campaign| {
        let name = campaign.name.trim().to_lowercase();
        candidates.iter().any(|c| *c == name)
    })
}

/// Pulls recipient files from the source folder into campaign recipient lists
pub struct RecipientSyncService {
    drive: Arc<dyn DriveClient>,
    storage: Arc<dyn Storage>,
    folder_id: String,
}

impl RecipientSyncService {
    pub fn new(drive: Arc<dyn DriveClient>, storage: Arc<dyn Storage>, folder_id: impl Into<String>) -> Self {
        Self { drive, storage, folder_id: folder_id.into() }
    }

    /// One full sync run. Files are handled one at a time; a failed download
    /// or an unknown campaign is recorded in the summary and the run moves on.
    /// Listing failures and storage errors end the run.
    #[instrument(skip(self), fields(folder = %self.folder_id))]
    pub async fn sync_and_persist_recipients(&self) -> Result<CampaignRecipientSyncSummary> {
        sync_metrics::run_started();
        let started = Instant::now();

        let files = self.drive.list_files_in_folder(&self.folder_id).await?;
        let campaigns = self.storage.list_campaigns().await?;
        info!("Found {} files and {} campaigns", files.len(), campaigns.len());

        let mut summary = CampaignRecipientSyncSummary { files_found: files.len(), ..Default::default() };
        for file in &files {
            self.sync_file(file, &campaigns, &mut summary).await?;
        }

        let elapsed = started.elapsed().as_secs_f64();
        sync_metrics::run_finished(&summary, elapsed);
        info!(
            files_found = summary.files_found,
            files_matched = summary.files_matched,
            recipients_parsed = summary.recipients_parsed,
            recipients_inserted = summary.recipients_inserted,
            unmatched = summary.unmatched_files.len(),
            failed = summary.failed_downloads.len(),
            "Recipient sync finished in {:.2}s",
            elapsed
        );
        Ok(summary)
    }

    async fn sync_file(
        &self,
        file: &DriveFile,
        campaigns: &[Campaign],
        summary: &mut CampaignRecipientSyncSummary,
    ) -> Result<()> {
        let content = match self.drive.download_file(file).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Download of {} failed: {}", file.name, e);
                summary.failed_downloads.push(FailedDownload { file_name: file.name.clone(), reason: e.to_string() });
                return Ok(());
            }
        };

        let parsed = parse_recipients(&content);
        summary.recipients_parsed += parsed.len();

        // unmatched recipients still count as parsed but are never inserted
        let Some(campaign) = match_campaign(&file.name, campaigns) else {
            debug!("No campaign matches file {} ({} recipients skipped)", file.name, parsed.len());
            summary.unmatched_files.push(file.name.clone());
            return Ok(());
        };
        summary.files_matched += 1;

        let unique = dedupe_recipients(parsed);

        let inserted = self.storage.insert_recipients_skip_duplicates(campaign.id, &unique).await?;
        summary.recipients_inserted += inserted;
        info!(
            "File {} -> campaign '{}': {} unique recipients, {} inserted",
            file.name,
            campaign.name,
            unique.len(),
            inserted
        );
        Ok(())
    }
}
