use chrono::NaiveDate;
use portal_ingest::auth::{Actor, Role};
use portal_ingest::ga::rows::{ChannelDaily, DateRange, MetricValues};
use portal_ingest::ga::{import_llm_dashboard, reset_property, GaMetricsService};
use portal_ingest::storage::{SqliteStorage, Storage};
use portal_ingest::types::CampaignRecipient;
use portal_ingest::webhook::{handle_webhook, register_query, LlmQuery, QueryKind, QueryStatus, WebhookOutcome, WebhookPayload};
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn recipient(email: &str, line1: &str) -> CampaignRecipient {
    CampaignRecipient {
        email: email.to_string(),
        address_line1: line1.to_string(),
        city: "Austin".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_recipient_uniqueness_survives_reopen() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nested").join("portal.db");

    let campaign_id = {
        let storage = SqliteStorage::open(&path)?;
        let campaign = storage.create_campaign("Spring").await?;
        let created = storage
            .insert_recipients_skip_duplicates(campaign.id, &[recipient("a@x.com", "1 Main"), recipient("b@x.com", "2 Main")])
            .await?;
        assert_eq!(created, 2);
        campaign.id
    };

    let storage = SqliteStorage::open(&path)?;
    assert_eq!(storage.list_campaigns().await?.len(), 1);
    // email collides with the first, address with the second
    let created = storage
        .insert_recipients_skip_duplicates(
            campaign_id,
            &[recipient("A@X.COM", "9 Other"), recipient("c@x.com", "2 MAIN"), recipient("d@x.com", "3 Main")],
        )
        .await?;
    assert_eq!(created, 1);

    let emails: Vec<_> = storage.list_recipients(campaign_id).await?.into_iter().map(|r| r.email).collect();
    assert_eq!(emails, vec!["a@x.com", "b@x.com", "d@x.com"]);
    Ok(())
}

#[tokio::test]
async fn test_ga_import_read_and_reset() -> anyhow::Result<()> {
    let storage = Arc::new(SqliteStorage::open_in_memory()?);
    let payload = json!({
        "response": {
            "datasets": [
                { "table": "Traffic_Sources", "rows": [
                    { "date": "20250502", "sessionSource": "google", "sessions": 7 },
                    { "date": "20250501", "sessionSource": "newsletter", "sessions": "3" },
                    { "date": "20250501", "sessionSource": "bing", "sessions": 1 }
                ] },
                { "table": "mystery_table", "rows": [{ "date": "2025-05-01" }] }
            ]
        }
    });

    let counts = import_llm_dashboard(storage.as_ref(), "prop-9", &payload).await?;
    assert_eq!(counts.source_daily, 3);
    assert_eq!(counts.total(), 3);

    let range = DateRange::new(day("2025-05-01"), day("2025-05-31"));
    let rows = storage.source_daily_between("prop-9", &range).await?;
    let order: Vec<_> = rows.iter().map(|r| (r.date, r.source.as_str())).collect();
    assert_eq!(
        order,
        vec![
            (day("2025-05-01"), "bing"),
            (day("2025-05-01"), "newsletter"),
            (day("2025-05-02"), "google"),
        ]
    );
    assert_eq!(rows[1].metrics.sessions, 3.0);

    // upsert replaces by key
    storage
        .upsert_channel_daily(&[ChannelDaily {
            ga_property_id: "prop-9".into(),
            date: day("2025-05-01"),
            channel: "Organic Search".into(),
            metrics: MetricValues { sessions: 1.0, ..Default::default() },
        }])
        .await?;
    storage
        .upsert_channel_daily(&[ChannelDaily {
            ga_property_id: "prop-9".into(),
            date: day("2025-05-01"),
            channel: "Organic Search".into(),
            metrics: MetricValues { sessions: 4.0, ..Default::default() },
        }])
        .await?;
    let channels = storage.channel_daily_between("prop-9", &range).await?;
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].metrics.sessions, 4.0);

    let service = GaMetricsService::new(storage.clone());
    let admin = Actor::new("admin", Role::Admin);
    let response = service.fetch_at(&admin, "prop-9", range, day("2025-06-01")).await?;
    assert!(response.kpi_daily.is_none());
    assert_eq!(response.source_daily.map(|r| r.len()), Some(3));

    let removed = reset_property(storage.as_ref(), "prop-9").await?;
    assert_eq!(removed.total(), 4);

    // nothing stored any more, so the next read backfills five years
    let response = service.fetch_at(&admin, "prop-9", range, day("2025-06-01")).await?;
    assert_eq!(response.metadata.full_date_range, DateRange::new(day("2020-06-01"), day("2025-06-01")));
    assert!(response.source_daily.is_none());
    Ok(())
}

#[tokio::test]
async fn test_dashboard_webhook_imports_once() -> anyhow::Result<()> {
    let storage = SqliteStorage::open_in_memory()?;
    register_query(&storage, LlmQuery::new("q-1", QueryKind::Dashboard, Some("prop-1".into()), "last month")).await?;

    let payload = || WebhookPayload {
        query_id: "q-1".to_string(),
        response: Some(json!({
            "datasets": [{ "table": "daily", "rows": [{ "date": "2025-01-01", "sessions": 12 }] }]
        })),
        error: None,
        line_graph_data: Some(json!([1, 2, 3])),
        pie_graph_data: None,
        metric_headers: None,
    };

    match handle_webhook(&storage, payload()).await? {
        WebhookOutcome::Completed { imported: Some(counts) } => assert_eq!(counts.kpi_daily, 1),
        other => panic!("unexpected outcome {:?}", other),
    }
    let stored = storage.get_llm_query("q-1").await?.expect("query saved");
    assert_eq!(stored.status, QueryStatus::Completed);
    assert_eq!(stored.line_graph_data, Some(json!([1, 2, 3])));

    assert_eq!(
        handle_webhook(&storage, payload()).await?,
        WebhookOutcome::AlreadyFinal { status: QueryStatus::Completed }
    );
    Ok(())
}

#[tokio::test]
async fn test_conflicting_finalize_keeps_first_outcome() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let storage = SqliteStorage::open(dir.path().join("portal.db"))?;
    let pending = register_query(&storage, LlmQuery::new("q-2", QueryKind::Chat, None, "why?")).await?;

    let mut failed = pending.clone();
    failed.status = QueryStatus::Failed;
    failed.error = Some("model timeout".to_string());
    let mut completed = pending.clone();
    completed.status = QueryStatus::Completed;
    completed.response = Some(json!("late answer"));

    assert!(storage.finalize_llm_query(&failed).await?);
    assert!(!storage.finalize_llm_query(&completed).await?);

    let stored = storage.get_llm_query("q-2").await?.expect("query saved");
    assert_eq!(stored.status, QueryStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("model timeout"));
    assert_eq!(stored.response, None);

    // a webhook arriving now is a no-op as well
    let late = WebhookPayload {
        query_id: "q-2".to_string(),
        response: Some(json!("another answer")),
        error: None,
        line_graph_data: None,
        pie_graph_data: None,
        metric_headers: None,
    };
    assert_eq!(
        handle_webhook(&storage, late).await?,
        WebhookOutcome::AlreadyFinal { status: QueryStatus::Failed }
    );
    Ok(())
}
