pub mod in_memory;
pub mod sqlite;

use crate::error::Result;
use crate::ga::rows::{ChannelDaily, DateRange, GaRowCounts, KpiDaily, KpiMonthly, SourceDaily};
use crate::types::{Campaign, CampaignRecipient};
use crate::webhook::LlmQuery;
use async_trait::async_trait;

pub use in_memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

/// Persistence for campaigns, recipients, GA metric tables and LLM queries.
///
/// Uniqueness is enforced here: recipient inserts skip rows whose email or
/// address key already exists for the campaign, and GA rows are replaced by
/// key on upsert.
#[async_trait]
pub trait Storage: Send + Sync {
    // Campaign operations
    async fn list_campaigns(&self) -> Result<Vec<Campaign>>;
    async fn create_campaign(&self, name: &str) -> Result<Campaign>;

    // Recipient operations
    /// Returns how many rows were actually created.
    async fn insert_recipients_skip_duplicates(
        &self,
        campaign_id: i64,
        recipients: &[CampaignRecipient],
    ) -> Result<usize>;
    async fn list_recipients(&self, campaign_id: i64) -> Result<Vec<CampaignRecipient>>;

    // GA metric upserts (create-or-replace by key)
    async fn upsert_kpi_daily(&self, rows: &[KpiDaily]) -> Result<usize>;
    async fn upsert_kpi_monthly(&self, rows: &[KpiMonthly]) -> Result<usize>;
    async fn upsert_channel_daily(&self, rows: &[ChannelDaily]) -> Result<usize>;
    async fn upsert_source_daily(&self, rows: &[SourceDaily]) -> Result<usize>;

    // GA metric reads, ascending by date (or month), then dimension
    async fn kpi_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<KpiDaily>>;
    async fn kpi_monthly_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<KpiMonthly>>;
    async fn channel_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<ChannelDaily>>;
    async fn source_daily_between(&self, ga_property_id: &str, range: &DateRange) -> Result<Vec<SourceDaily>>;

    async fn ga_row_counts(&self, ga_property_id: &str) -> Result<GaRowCounts>;
    /// Remove every GA row for a property; returns what was removed.
    async fn delete_ga_rows(&self, ga_property_id: &str) -> Result<GaRowCounts>;

    // LLM query operations
    async fn save_llm_query(&self, query: &LlmQuery) -> Result<()>;
    async fn get_llm_query(&self, query_id: &str) -> Result<Option<LlmQuery>>;
    /// Write a query's outcome only while the stored row is not yet
    /// `COMPLETED` or `FAILED`, as one atomic check-and-write. Returns `false`
    /// when another delivery finished the query first.
    async fn finalize_llm_query(&self, query: &LlmQuery) -> Result<bool>;
}
