//! Reshapes LLM dashboard responses into normalized GA metric rows.
//!
//! Upstream datasets arrive as `{ "table": ..., "rows": ... }` objects with
//! loosely named keys and either snake_case or camelCase measures. Every
//! dataset is handled on its own: a malformed dataset is skipped without
//! affecting the others. Only an invalid top-level shape fails the call.

use super::rows::{ChannelDaily, KpiDaily, KpiMonthly, MetricValues, SourceDaily};
use super::tables::GaTable;
use crate::error::{PortalError, Result};
use crate::observability;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

pub const TRANSFORM_FAILED: &str = "Failed to transform LLM dashboard data";

const NOT_SET: &str = "(not set)";

const SESSIONS_KEYS: &[&str] = &["sessions"];
const ENGAGEMENT_RATE_KEYS: &[&str] = &["engagement_rate", "engagementRate"];
const AVG_SESSION_DURATION_KEYS: &[&str] = &[
    "avg_session_duration",
    "average_session_duration",
    "averageSessionDuration",
    "avgSessionDuration",
];
const GOAL_COMPLETIONS_KEYS: &[&str] = &["goal_completions", "goalCompletions", "conversions"];
const GOAL_CONVERSION_RATE_KEYS: &[&str] = &["goal_conversion_rate", "goalConversionRate", "conversion_rate"];
const PAGEVIEWS_PER_SESSION_KEYS: &[&str] = &[
    "pageviews_per_session",
    "screen_page_views_per_session",
    "screenPageViewsPerSession",
    "pageViewsPerSession",
];
const DATE_KEYS: &[&str] = &["date"];
const MONTH_KEYS: &[&str] = &["month", "year_month", "yearMonth"];
const CHANNEL_KEYS: &[&str] = &[
    "channel",
    "session_default_channel_group",
    "sessionDefaultChannelGroup",
    "channel_group",
];
const SOURCE_KEYS: &[&str] = &["source", "session_source", "sessionSource"];

/// Rows produced from one dashboard response. `None` means the response had
/// no rows for that table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformedDashboard {
    pub kpi_daily: Option<Vec<KpiDaily>>,
    pub kpi_monthly: Option<Vec<KpiMonthly>>,
    pub channel_daily: Option<Vec<ChannelDaily>>,
    pub source_daily: Option<Vec<SourceDaily>>,
}

#[derive(Default)]
struct Collected {
    kpi_daily: Vec<KpiDaily>,
    kpi_monthly: Vec<KpiMonthly>,
    channel_daily: Vec<ChannelDaily>,
    source_daily: Vec<SourceDaily>,
}

impl Collected {
    fn finish(self) -> TransformedDashboard {
        fn non_empty<T>(rows: Vec<T>) -> Option<Vec<T>> {
            if rows.is_empty() {
                None
            } else {
                Some(rows)
            }
        }
        TransformedDashboard {
            kpi_daily: non_empty(self.kpi_daily),
            kpi_monthly: non_empty(self.kpi_monthly),
            channel_daily: non_empty(self.channel_daily),
            source_daily: non_empty(self.source_daily),
        }
    }
}

/// Transform a dashboard response (object, or array whose first element is
/// used) into rows stamped with `ga_property_id`.
pub fn transform_llm_dashboard(payload: &Value, ga_property_id: &str) -> Result<TransformedDashboard> {
    match transform_inner(payload, ga_property_id) {
        Ok(out) => Ok(out),
        Err(reason) => {
            error!(%reason, ga_property_id, "{}", TRANSFORM_FAILED);
            Err(PortalError::Transform(TRANSFORM_FAILED.to_string()))
        }
    }
}

fn transform_inner(payload: &Value, ga_property_id: &str) -> std::result::Result<TransformedDashboard, String> {
    let response = match payload {
        Value::Array(items) => items.first().ok_or_else(|| "response array is empty".to_string())?,
        other => other,
    };

    let datasets = find_datasets(response).ok_or_else(|| "response has no datasets array".to_string())?;

    let mut collected = Collected::default();
    for (index, dataset) in datasets.iter().enumerate() {
        let Some((table_name, rows)) = read_dataset(dataset) else {
            debug!(index, "Skipping dataset without usable table/rows");
            observability::metrics::ga::dataset_skipped("malformed");
            continue;
        };

        let table = GaTable::from_name(&table_name);
        let rows = rows.iter().filter_map(Value::as_object);
        match table {
            GaTable::KpiDaily => collected
                .kpi_daily
                .extend(rows.filter_map(|r| map_kpi_daily(r, ga_property_id))),
            GaTable::KpiMonthly => collected
                .kpi_monthly
                .extend(rows.filter_map(|r| map_kpi_monthly(r, ga_property_id))),
            GaTable::ChannelDaily => collected
                .channel_daily
                .extend(rows.filter_map(|r| map_channel_daily(r, ga_property_id))),
            GaTable::SourceDaily => collected
                .source_daily
                .extend(rows.filter_map(|r| map_source_daily(r, ga_property_id))),
            GaTable::Unknown => {
                warn!(table = %table_name, "Ignoring dataset with unrecognized table name");
                observability::metrics::ga::dataset_skipped("unknown_table");
            }
        }
    }

    info!(
        ga_property_id,
        kpi_daily = collected.kpi_daily.len(),
        kpi_monthly = collected.kpi_monthly.len(),
        channel_daily = collected.channel_daily.len(),
        source_daily = collected.source_daily.len(),
        "Transformed dashboard datasets"
    );
    Ok(collected.finish())
}

/// `datasets` at the top level, or inside a `response` envelope (object or JSON string).
fn find_datasets(response: &Value) -> Option<Vec<Value>> {
    if let Some(datasets) = response.get("datasets").and_then(Value::as_array) {
        return Some(datasets.clone());
    }
    match response.get("response")? {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|inner| inner.get("datasets").and_then(Value::as_array).cloned()),
        inner => inner.get("datasets").and_then(Value::as_array).cloned(),
    }
}

fn normalize_key(key: &str) -> String {
    key.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase()
}

/// Pull the table name and row list out of a dataset, tolerating key casing
/// and rows delivered as a JSON string.
fn read_dataset(dataset: &Value) -> Option<(String, Vec<Value>)> {
    let obj = dataset.as_object()?;

    let mut table = None;
    let mut rows = None;
    for (key, value) in obj {
        match normalize_key(key).as_str() {
            "table" => table = Some(value),
            "rows" | "row" => rows = Some(value),
            _ => {}
        }
    }

    let table = table?.as_str()?.to_string();
    let rows = match rows? {
        Value::Array(items) => items.clone(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            Ok(_) => return None,
            Err(e) => {
                debug!(table = %table, "Dataset rows are not valid JSON: {}", e);
                return None;
            }
        },
        _ => return None,
    };
    Some((table, rows))
}

/// Truthiness as the upstream payloads assume: null, false, 0, NaN and "" are empty.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn first_truthy<'a>(row: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| row.get(*k)).find(|v| is_truthy(v))
}

/// Numeric coercion where anything unparseable becomes zero.
fn to_number(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(0.0)
            }
        }
        Value::Bool(true) => 1.0,
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn number_field(row: &Map<String, Value>, keys: &[&str]) -> f64 {
    first_truthy(row, keys).map(to_number).unwrap_or(0.0)
}

fn string_field(row: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match first_truthy(row, keys)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` (optionally followed by a time) and GA's `YYYYMMDD`.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 8 && raw.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(raw, "%Y%m%d").ok();
    }
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

/// Accepts `YYYY-MM`, `YYYY-MM-DD` and GA's `YYYYMM`; returns `YYYY-MM`.
pub(crate) fn parse_month(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let first_of_month = if raw.len() == 6 && raw.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}-01", &raw[..4], &raw[4..])
    } else {
        format!("{}-01", raw.get(..7)?)
    };
    NaiveDate::parse_from_str(&first_of_month, "%Y-%m-%d")
        .ok()
        .map(super::rows::month_key)
}

fn map_metrics(row: &Map<String, Value>) -> MetricValues {
    MetricValues {
        sessions: number_field(row, SESSIONS_KEYS),
        engagement_rate: number_field(row, ENGAGEMENT_RATE_KEYS),
        avg_session_duration: number_field(row, AVG_SESSION_DURATION_KEYS),
        goal_completions: number_field(row, GOAL_COMPLETIONS_KEYS),
        goal_conversion_rate: number_field(row, GOAL_CONVERSION_RATE_KEYS),
        screen_page_views_per_session: number_field(row, PAGEVIEWS_PER_SESSION_KEYS),
    }
}

fn row_date(row: &Map<String, Value>) -> Option<NaiveDate> {
    let date = string_field(row, DATE_KEYS).and_then(|d| parse_date(&d));
    if date.is_none() {
        debug!("Skipping row without a usable date");
    }
    date
}

fn map_kpi_daily(row: &Map<String, Value>, ga_property_id: &str) -> Option<KpiDaily> {
    Some(KpiDaily {
        ga_property_id: ga_property_id.to_string(),
        date: row_date(row)?,
        metrics: map_metrics(row),
    })
}

fn map_kpi_monthly(row: &Map<String, Value>, ga_property_id: &str) -> Option<KpiMonthly> {
    let month = string_field(row, MONTH_KEYS).and_then(|m| parse_month(&m))?;
    Some(KpiMonthly {
        ga_property_id: ga_property_id.to_string(),
        month,
        metrics: map_metrics(row),
    })
}

fn map_channel_daily(row: &Map<String, Value>, ga_property_id: &str) -> Option<ChannelDaily> {
    Some(ChannelDaily {
        ga_property_id: ga_property_id.to_string(),
        date: row_date(row)?,
        channel: string_field(row, CHANNEL_KEYS).unwrap_or_else(|| NOT_SET.to_string()),
        metrics: map_metrics(row),
    })
}

fn map_source_daily(row: &Map<String, Value>, ga_property_id: &str) -> Option<SourceDaily> {
    Some(SourceDaily {
        ga_property_id: ga_property_id.to_string(),
        date: row_date(row)?,
        source: string_field(row, SOURCE_KEYS).unwrap_or_else(|| NOT_SET.to_string()),
        metrics: map_metrics(row),
    })
}
