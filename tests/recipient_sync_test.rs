mod common;

use common::{FakeDrive, FakeFile};
use portal_ingest::drive::GoogleDriveClient;
use portal_ingest::storage::{SqliteStorage, Storage};
use portal_ingest::sync::RecipientSyncService;
use std::sync::Arc;
use tempfile::tempdir;

const FILE_A: &str = "\
email_address,address_line_1,city,state,zip,core_segment
one@x.com,\"1 Main St, Apt 2\",Austin,TX,78701,Retail
two@x.com,9 Elm St,Dallas,TX,75201,\"Says \"\"hi\"\"\"
,5 Oak St,Houston,TX,77001,Retail
";

// no email column, so nothing parses out of it
const FILE_C: &str = "city,state\nAustin,TX\n";

#[tokio::test]
async fn test_three_file_scenario_against_sqlite() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let storage = Arc::new(SqliteStorage::open(dir.path().join("portal.db"))?);
    let campaign = storage.create_campaign("Campaign A").await?;

    let base = FakeDrive::new(vec![
        FakeFile { id: "a", name: "campaign_a.csv", mime_type: "text/csv", body: Some(FILE_A) },
        FakeFile { id: "b", name: "B", mime_type: "text/csv", body: None },
        FakeFile { id: "c", name: "C", mime_type: "text/csv", body: Some(FILE_C) },
    ])
    .spawn();
    let drive = Arc::new(GoogleDriveClient::new(&FakeDrive::config(&base))?);

    let service = RecipientSyncService::new(drive, storage.clone(), "folder-1");
    let summary = service.sync_and_persist_recipients().await?;

    assert_eq!(summary.files_found, 3);
    assert_eq!(summary.files_matched, 1);
    assert_eq!(summary.recipients_parsed, 2);
    assert_eq!(summary.recipients_inserted, 2);
    assert_eq!(summary.unmatched_files, vec!["C".to_string()]);
    assert_eq!(summary.failed_downloads.len(), 1);
    assert_eq!(summary.failed_downloads[0].file_name, "B");

    let stored = storage.list_recipients(campaign.id).await?;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].address_line1, "1 Main St, Apt 2");
    assert_eq!(stored[1].core_segment, "Says \"hi\"");

    let json = serde_json::to_value(&summary)?;
    assert_eq!(json["failedDownloads"][0]["fileName"], "B");

    // the same folder again adds nothing
    let again = service.sync_and_persist_recipients().await?;
    assert_eq!(again.recipients_inserted, 0);
    assert_eq!(storage.list_recipients(campaign.id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unmatched_file_counts_toward_parsed() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let storage = Arc::new(SqliteStorage::open(dir.path().join("portal.db"))?);
    let campaign = storage.create_campaign("Campaign A").await?;

    let base = FakeDrive::new(vec![
        FakeFile { id: "a", name: "campaign_a.csv", mime_type: "text/csv", body: Some(FILE_A) },
        FakeFile { id: "c", name: "C", mime_type: "text/csv", body: Some("email\nthree@x.com\nfour@x.com\n") },
    ])
    .spawn();
    let drive = Arc::new(GoogleDriveClient::new(&FakeDrive::config(&base))?);

    let summary = RecipientSyncService::new(drive, storage.clone(), "folder-1").sync_and_persist_recipients().await?;

    assert_eq!(summary.recipients_parsed, 4);
    assert_eq!(summary.recipients_inserted, 2);
    assert_eq!(summary.unmatched_files, vec!["C".to_string()]);
    assert_eq!(storage.list_recipients(campaign.id).await?.len(), 2);
    Ok(())
}
