use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Measures shared by every GA metric table
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValues {
    pub sessions: f64,
    pub engagement_rate: f64,
    pub avg_session_duration: f64,
    pub goal_completions: f64,
    pub goal_conversion_rate: f64,
    pub screen_page_views_per_session: f64,
}

/// Keyed by `(ga_property_id, date)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiDaily {
    pub ga_property_id: String,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub metrics: MetricValues,
}

/// Keyed by `(ga_property_id, month)`; month is `YYYY-MM`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiMonthly {
    pub ga_property_id: String,
    pub month: String,
    #[serde(flatten)]
    pub metrics: MetricValues,
}

/// Keyed by `(ga_property_id, date, channel)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDaily {
    pub ga_property_id: String,
    pub date: NaiveDate,
    pub channel: String,
    #[serde(flatten)]
    pub metrics: MetricValues,
}

/// Keyed by `(ga_property_id, date, source)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDaily {
    pub ga_property_id: String,
    pub date: NaiveDate,
    pub source: String,
    #[serde(flatten)]
    pub metrics: MetricValues,
}

/// Row counts per table for one property
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GaRowCounts {
    pub kpi_daily: usize,
    pub kpi_monthly: usize,
    pub channel_daily: usize,
    pub source_daily: usize,
}

impl GaRowCounts {
    pub fn total(&self) -> usize {
        self.kpi_daily + self.kpi_monthly + self.channel_daily + self.source_daily
    }
}

/// `YYYY-MM` key for the month containing `date`
pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// Inclusive date window, serialized as ISO dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    /// Month keys covering the window, for the monthly table
    pub fn month_bounds(&self) -> (String, String) {
        (month_key(self.from), month_key(self.to))
    }
}
