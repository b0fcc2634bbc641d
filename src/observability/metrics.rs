//! Metric names and recording helpers for the ingestion pipelines.
//!
//! Recording is always safe: without an installed exporter the `metrics`
//! macros are no-ops.

use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Recipient sync
    SyncRuns,
    SyncFilesFound,
    SyncFilesFailed,
    SyncFilesUnmatched,
    SyncRecipientsParsed,
    SyncRecipientsInserted,
    SyncDuration,

    // GA pipeline
    GaDatasetsSkipped,
    GaRowsUpserted,
    GaBackfills,
    GaQueryDuration,

    // Webhooks
    WebhooksReceived,
    WebhooksIgnored,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SyncRuns => "portal_sync_runs_total",
            MetricName::SyncFilesFound => "portal_sync_files_found_total",
            MetricName::SyncFilesFailed => "portal_sync_files_failed_total",
            MetricName::SyncFilesUnmatched => "portal_sync_files_unmatched_total",
            MetricName::SyncRecipientsParsed => "portal_recipients_parsed_total",
            MetricName::SyncRecipientsInserted => "portal_recipients_inserted_total",
            MetricName::SyncDuration => "portal_sync_duration_seconds",
            MetricName::GaDatasetsSkipped => "portal_ga_datasets_skipped_total",
            MetricName::GaRowsUpserted => "portal_ga_rows_upserted_total",
            MetricName::GaBackfills => "portal_ga_backfills_total",
            MetricName::GaQueryDuration => "portal_ga_query_duration_seconds",
            MetricName::WebhooksReceived => "portal_webhooks_received_total",
            MetricName::WebhooksIgnored => "portal_webhooks_ignored_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus exporter on `port`. Failure is logged, not fatal.
pub fn init(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => tracing::warn!("Prometheus exporter install failed (possibly already installed): {}", e),
    }
}

// ============================================================================
// Recipient sync
// ============================================================================

pub mod sync {
    use super::MetricName;
    use crate::types::CampaignRecipientSyncSummary;

    pub fn run_started() {
        ::metrics::counter!(MetricName::SyncRuns.as_str()).increment(1);
    }

    pub fn run_finished(summary: &CampaignRecipientSyncSummary, secs: f64) {
        ::metrics::counter!(MetricName::SyncFilesFound.as_str()).increment(summary.files_found as u64);
        ::metrics::counter!(MetricName::SyncFilesFailed.as_str()).increment(summary.failed_downloads.len() as u64);
        ::metrics::counter!(MetricName::SyncFilesUnmatched.as_str()).increment(summary.unmatched_files.len() as u64);
        ::metrics::counter!(MetricName::SyncRecipientsParsed.as_str()).increment(summary.recipients_parsed as u64);
        ::metrics::counter!(MetricName::SyncRecipientsInserted.as_str()).increment(summary.recipients_inserted as u64);
        ::metrics::histogram!(MetricName::SyncDuration.as_str()).record(secs);
    }
}

// ============================================================================
// GA pipeline
// ============================================================================

pub mod ga {
    use super::MetricName;

    pub fn dataset_skipped(reason: &'static str) {
        ::metrics::counter!(MetricName::GaDatasetsSkipped.as_str(), "reason" => reason).increment(1);
    }

    pub fn rows_upserted(table: &'static str, count: usize) {
        ::metrics::counter!(MetricName::GaRowsUpserted.as_str(), "table" => table).increment(count as u64);
    }

    pub fn backfill_requested() {
        ::metrics::counter!(MetricName::GaBackfills.as_str()).increment(1);
    }

    pub fn query_duration(secs: f64) {
        ::metrics::histogram!(MetricName::GaQueryDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Webhooks
// ============================================================================

pub mod webhook {
    use super::MetricName;

    pub fn received() {
        ::metrics::counter!(MetricName::WebhooksReceived.as_str()).increment(1);
    }

    /// Webhook for a query that already reached a final state
    pub fn ignored() {
        ::metrics::counter!(MetricName::WebhooksIgnored.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [MetricName::SyncRuns, MetricName::GaRowsUpserted, MetricName::WebhooksIgnored] {
            assert!(name.to_string().starts_with("portal_"));
        }
    }

    #[test]
    fn test_recording_without_exporter_is_noop() {
        ga::dataset_skipped("malformed");
        webhook::received();
    }
}
