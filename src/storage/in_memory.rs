use super::Storage;
use crate::error::{PortalError, Result};
use crate::ga::rows::{ChannelDaily, DateRange, GaRowCounts, KpiDaily, KpiMonthly, SourceDaily};
use crate::recipients::{address_key, email_key};
use crate::types::{Campaign, CampaignRecipient};
use crate::webhook::LlmQuery;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct RecipientTable {
    rows: Vec<(i64, CampaignRecipient)>,
    email_keys: HashSet<(i64, String)>,
    address_keys: HashSet<(i64, String)>,
}

/// In-memory storage implementation for development/testing
#[derive(Default)]
pub struct InMemoryStorage {
    campaigns: Mutex<Vec<Campaign>>,
    recipients: Mutex<RecipientTable>,
    kpi_daily: Mutex<BTreeMap<(String, NaiveDate), KpiDaily>>,
    kpi_monthly: Mutex<BTreeMap<(String, String), KpiMonthly>>,
    channel_daily: Mutex<BTreeMap<(String, NaiveDate, String), ChannelDaily>>,
    source_daily: Mutex<BTreeMap<(String, NaiveDate, String), SourceDaily>>,
    llm_queries: Mutex<HashMap<String, LlmQuery>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| PortalError::Storage("in-memory store lock poisoned".to_string()))
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(lock(&self.campaigns)?.clone())
    }

    async fn create_campaign(&self, name: &str) -> Result<Campaign> {
        let mut campaigns = lock(&self.campaigns)?;
        if campaigns.iter().any(|c| c.name == name) {
            return Err(PortalError::Storage(format!("campaign '{}' already exists", name)));
        }
        let campaign = Campaign {
            id: campaigns.len() as i64 + 1,
            name: name.to_string(),
        };
        campaigns.push(campaign.clone());
        debug!("Created campaign: {} with id {}", campaign.name, campaign.id);
        Ok(campaign)
    }

    async fn insert_recipients_skip_duplicates(
        &self,
        campaign_id: i64,
        recipients: &[CampaignRecipient],
    ) -> Result<usize> {
        let mut table = lock(&self.recipients)?;
        let mut created = 0;
        for recipient in recipients {
            let email = email_key(recipient).map(|k| (campaign_id, k));
            let address = address_key(recipient).map(|k| (campaign_id, k));
            if email.as_ref().is_some_and(|k| table.email_keys.contains(k))
                || address.as_ref().is_some_and(|k| table.address_keys.contains(k))
            {
                continue;
            }
            if let Some(k) = email {
                table.email_keys.insert(k);
            }
            if let Some(k) = address {
                table.address_keys.insert(k);
            }
            table.rows.push((campaign_id, recipient.clone()));
            created += 1;
        }
        Ok(created)
    }

    async fn list_recipients(&self, campaign_id: i64) -> Result<Vec<CampaignRecipient>> {
        let table = lock(&self.recipients)?;
        Ok(table
            .rows
            .iter()
            .filter(|(id, _)| *id == campaign_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn upsert_kpi_daily(&self, rows: &[KpiDaily]) -> Result<usize> {
        let mut table = lock(&self.kpi_daily)?;
        for row in rows {
            table.insert((row.ga_property_id.clone(), row.date), row.clone());
        }
        Ok(rows.len())
    }

    async fn upsert_kpi_monthly(&self, rows: &[KpiMonthly]) -> Result<usize> {
        let mut table = lock(&self.kpi_monthly)?;
        for row in rows {
            table.insert((row.ga_property_id.clone(), row.month.clone()), row.clone());
        }
        Ok(rows.len())
    }

    async fn upsert_channel_daily(&self, rows: &[ChannelDaily]) -> Result<usize> {
        let mut table = lock(&self.channel_daily)?;
        for row in rows {
            table.insert((row.ga_property_id.clone(), row.date, row.channel.clone()), row.clone());
        }
        Ok(rows.len())
    }

    async fn upsert_source_daily(&self, rows: &[SourceDaily]) -> Result<usize> {
        let mut table = lock(&self.source_daily)?;
        for row in rows {
            table.insert((row.ga_property_id.clone(), row.date, row.source.clone()), row.clone());
        }
        Ok(rows.len())
    }

    async fn kpi_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<KpiDaily>> {
        let table = lock(&self.kpi_daily)?;
        Ok(table
            .values()
            .filter(|r| r.ga_property_id == ga_property_id && range.contains(r.date))
            .cloned()
            .collect())
    }

    async fn kpi_monthly_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<KpiMonthly>> {
        let (from, to) = range.month_bounds();
        let table = lock(&self.kpi_monthly)?;
        Ok(table
            .values()
            .filter(|r| r.ga_property_id == ga_property_id && r.month >= from && r.month <= to)
            .cloned()
            .collect())
    }

    async fn channel_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<ChannelDaily>> {
        let table = lock(&self.channel_daily)?;
        Ok(table
            .values()
            .filter(|r| r.ga_property_id == ga_property_id && range.contains(r.date))
            .cloned()
            .collect())
    }

    async fn source_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<SourceDaily>> {
        let table = lock(&self.source_daily)?;
        Ok(table
            .values()
            .filter(|r| r.ga_property_id == ga_property_id && range.contains(r.date))
            .cloned()
            .collect())
    }

    async fn ga_row_counts(&self, ga_property_id: &str) -> Result<GaRowCounts> {
        Ok(GaRowCounts {
            kpi_daily: lock(&self.kpi_daily)?.keys().filter(|k| k.0 == ga_property_id).count(),
            kpi_monthly: lock(&self.kpi_monthly)?.keys().filter(|k| k.0 == ga_property_id).count(),
            channel_daily: lock(&self.channel_daily)?.keys().filter(|k| k.0 == ga_property_id).count(),
            source_daily: lock(&self.source_daily)?.keys().filter(|k| k.0 == ga_property_id).count(),
        })
    }

    async fn delete_ga_rows(&self, ga_property_id: &str) -> Result<GaRowCounts> {
        let removed = self.ga_row_counts(ga_property_id).await?;
        lock(&self.kpi_daily)?.retain(|k, _| k.0 != ga_property_id);
        lock(&self.kpi_monthly)?.retain(|k, _| k.0 != ga_property_id);
        lock(&self.channel_daily)?.retain(|k, _| k.0 != ga_property_id);
        lock(&self.source_daily)?.retain(|k, _| k.0 != ga_property_id);
        Ok(removed)
    }

    async fn save_llm_query(&self, query: &LlmQuery) -> Result<()> {
        lock(&self.llm_queries)?.insert(query.id.clone(), query.clone());
        Ok(())
    }

    async fn get_llm_query(&self, query_id: &str) -> Result<Option<LlmQuery>> {
        Ok(lock(&self.llm_queries)?.get(query_id).cloned())
    }

    async fn finalize_llm_query(&self, query: &LlmQuery) -> Result<bool> {
        let mut queries = lock(&self.llm_queries)?;
        match queries.get_mut(&query.id) {
            Some(stored) if !stored.status.is_final() => {
                *stored = query.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ga::rows::MetricValues;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_insert_skips_existing_keys_across_calls() {
        let storage = InMemoryStorage::new();
        let campaign = storage.create_campaign("Spring").await.unwrap();
        let a = CampaignRecipient { email: "a@x.com".into(), ..Default::default() };
        let b = CampaignRecipient { email: "A@X.com".into(), ..Default::default() };

        assert_eq!(storage.insert_recipients_skip_duplicates(campaign.id, &[a]).await.unwrap(), 1);
        assert_eq!(storage.insert_recipients_skip_duplicates(campaign.id, &[b.clone()]).await.unwrap(), 0);
        // same email under another campaign is fine
        assert_eq!(storage.insert_recipients_skip_duplicates(campaign.id + 1, &[b]).await.unwrap(), 1);
        assert_eq!(storage.list_recipients(campaign.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key_and_reads_ascending() {
        let storage = InMemoryStorage::new();
        let row = |d: &str, sessions: f64| KpiDaily {
            ga_property_id: "p".into(),
            date: day(d),
            metrics: MetricValues { sessions, ..Default::default() },
        };
        storage
            .upsert_kpi_daily(&[row("2024-01-03", 3.0), row("2024-01-01", 1.0)])
            .await
            .unwrap();
        storage.upsert_kpi_daily(&[row("2024-01-01", 10.0)]).await.unwrap();

        let range = DateRange::new(day("2024-01-01"), day("2024-01-31"));
        let rows = storage.kpi_daily_between("p", &range).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, day("2024-01-01"));
        assert_eq!(rows[0].metrics.sessions, 10.0);
        assert_eq!(rows[1].date, day("2024-01-03"));
    }

    #[tokio::test]
    async fn test_delete_only_touches_one_property() {
        let storage = InMemoryStorage::new();
        for property in ["p1", "p2"] {
            storage
                .upsert_kpi_monthly(&[KpiMonthly {
                    ga_property_id: property.into(),
                    month: "2024-01".into(),
                    metrics: MetricValues::default(),
                }])
                .await
                .unwrap();
        }
        let removed = storage.delete_ga_rows("p1").await.unwrap();
        assert_eq!(removed.kpi_monthly, 1);
        assert_eq!(storage.ga_row_counts("p1").await.unwrap().total(), 0);
        assert_eq!(storage.ga_row_counts("p2").await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_finalize_only_moves_pending_queries() {
        use crate::webhook::{QueryKind, QueryStatus};

        let storage = InMemoryStorage::new();
        let pending = LlmQuery::new("q", QueryKind::Chat, None, "p");
        storage.save_llm_query(&pending).await.unwrap();

        let mut failed = pending.clone();
        failed.status = QueryStatus::Failed;
        failed.error = Some("model timeout".into());
        let mut completed = pending.clone();
        completed.status = QueryStatus::Completed;
        completed.response = Some(serde_json::json!("late answer"));

        assert!(storage.finalize_llm_query(&failed).await.unwrap());
        assert!(!storage.finalize_llm_query(&completed).await.unwrap());

        let stored = storage.get_llm_query("q").await.unwrap().unwrap();
        assert_eq!(stored.status, QueryStatus::Failed);
        assert_eq!(stored.response, None);
        // unknown ids are never created
        let mut stray = completed.clone();
        stray.id = "missing".into();
        assert!(!storage.finalize_llm_query(&stray).await.unwrap());
        assert!(storage.get_llm_query("missing").await.unwrap().is_none());
    }
}
