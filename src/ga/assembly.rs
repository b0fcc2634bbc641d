//! Read side of the GA metrics tables.
//!
//! Both the admin and the client HTTP entry points go through
//! [`GaMetricsService::fetch`]; they differ only in which actor they resolve.
//! The service decides the query window (first-time backfill vs. year-over-year
//! widening), optionally pulls a fresh dashboard from the metrics service,
//! then reads the four tables concurrently.

use super::persist::import_llm_dashboard;
use super::rows::{ChannelDaily, DateRange, KpiDaily, KpiMonthly, SourceDaily};
use crate::auth::{self, Action, Actor, Resource};
use crate::constants::{BACKFILL_YEARS, COMPARISON_YEARS};
use crate::error::{PortalError, Result};
use crate::observability::metrics::ga as ga_metrics;
use crate::storage::Storage;
use async_trait::async_trait;
use chrono::{Local, Months, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Upstream producer of dashboard payloads for a property and window.
#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn fetch_dashboard(&self, ga_property_id: &str, window: &DateRange) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub display_date_range: DateRange,
    pub full_date_range: DateRange,
}

/// A `None` collection means the table had no rows in the window and
/// serializes as `null`, never `[]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GaMetricsResponse {
    pub kpi_daily: Option<Vec<KpiDaily>>,
    pub kpi_monthly: Option<Vec<KpiMonthly>>,
    pub channel_daily: Option<Vec<ChannelDaily>>,
    pub source_daily: Option<Vec<SourceDaily>>,
    pub metadata: ResponseMetadata,
}

fn non_empty<T>(rows: Vec<T>) -> Option<Vec<T>> {
    if rows.is_empty() {
        None
    } else {
        Some(rows)
    }
}

fn years_before(date: NaiveDate, years: i32) -> Result<NaiveDate> {
    let months = u32::try_from(years * 12)
        .map_err(|_| PortalError::Config(format!("invalid year offset {}", years)))?;
    date.checked_sub_months(Months::new(months))
        .ok_or_else(|| PortalError::Transform(format!("date out of range: {} minus {} years", date, years)))
}

/// Decide which window to query.
///
/// With no stored rows for the property the window becomes a one-time
/// backfill of [`BACKFILL_YEARS`] ending today; otherwise the requested start
/// is pushed back [`COMPARISON_YEARS`] and the end pinned to today. The start
/// never passes today, so a request in the future collapses to today alone.
pub fn resolve_window(has_any_rows: bool, requested: &DateRange, today: NaiveDate) -> Result<DateRange> {
    let from = if has_any_rows {
        years_before(requested.from, COMPARISON_YEARS)?
    } else {
        years_before(today, BACKFILL_YEARS)?
    };
    Ok(DateRange::new(from.min(today), today))
}

pub struct GaMetricsService {
    storage: Arc<dyn Storage>,
    source: Option<Arc<dyn DashboardSource>>,
}

impl GaMetricsService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, source: None }
    }

    pub fn with_source(mut self, source: Arc<dyn DashboardSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub async fn fetch(&self, actor: &Actor, ga_property_id: &str, requested: DateRange) -> Result<GaMetricsResponse> {
        self.fetch_at(actor, ga_property_id, requested, Local::now().date_naive()).await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn fetch_at(
        &self,
        actor: &Actor,
        ga_property_id: &str,
        requested: DateRange,
        today: NaiveDate,
    ) -> Result<GaMetricsResponse> {
        auth::ensure(actor, Resource::GaProperty(ga_property_id), Action::Read)?;
        let started = Instant::now();

        let has_any_rows = self.storage.ga_row_counts(ga_property_id).await?.total() > 0;
        let window = resolve_window(has_any_rows, &requested, today)?;
        if !has_any_rows {
            info!(from = %window.from, to = %window.to, "No stored GA rows, backfilling");
            ga_metrics::backfill_requested();
        }

        if let Some(source) = &self.source {
            self.refresh_from_source(source.as_ref(), ga_property_id, &window).await;
        }

        let storage = self.storage.as_ref();
        let (kpi_daily, kpi_monthly, channel_daily, source_daily) = tokio::try_join!(
            storage.kpi_daily_between(ga_property_id, &window),
            storage.kpi_monthly_between(ga_property_id, &window),
            storage.channel_daily_between(ga_property_id, &window),
            storage.source_daily_between(ga_property_id, &window),
        )?;

        debug!(
            kpi_daily = kpi_daily.len(),
            kpi_monthly = kpi_monthly.len(),
            channel_daily = channel_daily.len(),
            source_daily = source_daily.len(),
            "GA rows read"
        );
        ga_metrics::query_duration(started.elapsed().as_secs_f64());

        Ok(GaMetricsResponse {
            kpi_daily: non_empty(kpi_daily),
            kpi_monthly: non_empty(kpi_monthly),
            channel_daily: non_empty(channel_daily),
            source_daily: non_empty(source_daily),
            metadata: ResponseMetadata { display_date_range: requested, full_date_range: window },
        })
    }

    // A failed refresh still serves whatever is stored.
    async fn refresh_from_source(&self, source: &dyn DashboardSource, ga_property_id: &str, window: &DateRange) {
        let imported = match source.fetch_dashboard(ga_property_id, window).await {
            Ok(payload) => import_llm_dashboard(self.storage.as_ref(), ga_property_id, &payload).await,
            Err(e) => Err(e),
        };
        match imported {
            Ok(counts) => debug!(rows = counts.total(), "Refreshed GA rows from metrics service"),
            Err(e) => warn!("GA refresh for {} failed: {}", ga_property_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::ga::rows::MetricValues;
    use crate::storage::InMemoryStorage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn admin() -> Actor {
        Actor::new("admin-1", Role::Admin)
    }

    fn kpi(prop: &str, d: &str) -> KpiDaily {
        KpiDaily {
            ga_property_id: prop.to_string(),
            date: day(d),
            metrics: MetricValues { sessions: 5.0, ..Default::default() },
        }
    }

    #[test]
    fn test_backfill_window_ignores_request() {
        let today = day("2025-06-15");
        let requested = DateRange::new(day("2025-06-01"), day("2025-06-10"));
        let window = resolve_window(false, &requested, today).unwrap();
        assert_eq!(window, DateRange::new(day("2020-06-15"), today));
    }

    #[test]
    fn test_existing_rows_widen_by_one_year() {
        let today = day("2025-06-15");
        let requested = DateRange::new(day("2025-03-01"), day("2025-03-31"));
        let window = resolve_window(true, &requested, today).unwrap();
        assert_eq!(window, DateRange::new(day("2024-03-01"), today));
    }

    #[test]
    fn test_future_request_never_inverts_window() {
        let today = day("2025-06-15");
        let requested = DateRange::new(day("2027-01-01"), day("2027-01-31"));
        let window = resolve_window(true, &requested, today).unwrap();
        assert_eq!(window, DateRange::new(today, today));

        // less than a year ahead still widens to before today
        let requested = DateRange::new(day("2025-09-01"), day("2025-09-30"));
        let window = resolve_window(true, &requested, today).unwrap();
        assert_eq!(window, DateRange::new(day("2024-09-01"), today));
    }

    #[test]
    fn test_leap_day_clamps() {
        let window = resolve_window(false, &DateRange::new(day("2024-02-29"), day("2024-02-29")), day("2024-02-29"))
            .unwrap();
        assert_eq!(window.from, day("2019-02-28"));
    }

    #[tokio::test]
    async fn test_empty_tables_are_null_not_empty() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.upsert_kpi_daily(&[kpi("p1", "2025-05-01")]).await.unwrap();
        let service = GaMetricsService::new(storage);

        let requested = DateRange::new(day("2025-05-01"), day("2025-05-31"));
        let response = service.fetch_at(&admin(), "p1", requested, day("2025-06-01")).await.unwrap();

        assert_eq!(response.kpi_daily.as_ref().map(Vec::len), Some(1));
        assert!(response.kpi_monthly.is_none());

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["channelDaily"], Value::Null);
        assert_eq!(value["sourceDaily"], Value::Null);
        assert_eq!(value["metadata"]["displayDateRange"], json!({"from": "2025-05-01", "to": "2025-05-31"}));
        assert_eq!(value["metadata"]["fullDateRange"], json!({"from": "2024-05-01", "to": "2025-06-01"}));
    }

    #[tokio::test]
    async fn test_rows_come_back_ascending() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .upsert_kpi_daily(&[kpi("p1", "2025-05-03"), kpi("p1", "2025-05-01"), kpi("p1", "2025-05-02")])
            .await
            .unwrap();
        let service = GaMetricsService::new(storage);
        let response = service
            .fetch_at(&admin(), "p1", DateRange::new(day("2025-05-01"), day("2025-05-31")), day("2025-06-01"))
            .await
            .unwrap();
        let dates: Vec<_> = response.kpi_daily.unwrap().iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day("2025-05-01"), day("2025-05-02"), day("2025-05-03")]);
    }

    #[tokio::test]
    async fn test_client_cannot_read_other_property() {
        let service = GaMetricsService::new(Arc::new(InMemoryStorage::new()));
        let client = Actor::new("c1", Role::Client).with_properties(["p1"]);
        let requested = DateRange::new(day("2025-05-01"), day("2025-05-31"));
        let result = service.fetch_at(&client, "p2", requested, day("2025-06-01")).await;
        assert!(matches!(result, Err(PortalError::Forbidden(_))));
    }

    struct FakeSource {
        calls: AtomicUsize,
        window: std::sync::Mutex<Option<DateRange>>,
        fail: bool,
    }

    #[async_trait]
    impl DashboardSource for FakeSource {
        async fn fetch_dashboard(&self, _ga_property_id: &str, window: &DateRange) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.window.lock().unwrap() = Some(*window);
            if self.fail {
                return Err(PortalError::Transform("upstream down".into()));
            }
            Ok(json!({
                "datasets": [{
                    "table": "monthly_metrics",
                    "rows": [{ "yearMonth": "202412", "sessions": "40" }]
                }]
            }))
        }
    }

    #[tokio::test]
    async fn test_first_fetch_backfills_from_source() {
        let storage = Arc::new(InMemoryStorage::new());
        let source = Arc::new(FakeSource { calls: AtomicUsize::new(0), window: Default::default(), fail: false });
        let service = GaMetricsService::new(storage).with_source(source.clone());

        let response = service
            .fetch_at(&admin(), "p1", DateRange::new(day("2025-05-01"), day("2025-05-31")), day("2025-06-01"))
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*source.window.lock().unwrap(), Some(DateRange::new(day("2020-06-01"), day("2025-06-01"))));
        let monthly = response.kpi_monthly.unwrap();
        assert_eq!(monthly[0].month, "2024-12");
        assert_eq!(monthly[0].metrics.sessions, 40.0);
        assert_eq!(response.metadata.full_date_range.from, day("2020-06-01"));
    }

    #[tokio::test]
    async fn test_source_failure_still_serves_stored_rows() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.upsert_kpi_daily(&[kpi("p1", "2025-05-10")]).await.unwrap();
        let source = Arc::new(FakeSource { calls: AtomicUsize::new(0), window: Default::default(), fail: true });
        let service = GaMetricsService::new(storage).with_source(source);

        let response = service
            .fetch_at(&admin(), "p1", DateRange::new(day("2025-05-01"), day("2025-05-31")), day("2025-06-01"))
            .await
            .unwrap();
        assert_eq!(response.kpi_daily.map(|r| r.len()), Some(1));
    }
}
