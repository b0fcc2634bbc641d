use super::rows::GaRowCounts;
use super::transform::{transform_llm_dashboard, TransformedDashboard};
use crate::error::Result;
use crate::observability::metrics::ga as ga_metrics;
use crate::storage::Storage;
use serde_json::Value;
use tracing::{info, instrument};

/// Transform a dashboard response and upsert every produced row.
#[instrument(skip(storage, payload))]
pub async fn import_llm_dashboard(storage: &dyn Storage, ga_property_id: &str, payload: &Value) -> Result<GaRowCounts> {
    let transformed = transform_llm_dashboard(payload, ga_property_id)?;
    persist_transformed(storage, &transformed).await
}

pub async fn persist_transformed(storage: &dyn Storage, data: &TransformedDashboard) -> Result<GaRowCounts> {
    let mut counts = GaRowCounts::default();

    if let Some(rows) = &data.kpi_daily {
        counts.kpi_daily = storage.upsert_kpi_daily(rows).await?;
        ga_metrics::rows_upserted("kpi_daily", counts.kpi_daily);
    }
    if let Some(rows) = &data.kpi_monthly {
        counts.kpi_monthly = storage.upsert_kpi_monthly(rows).await?;
        ga_metrics::rows_upserted("kpi_monthly", counts.kpi_monthly);
    }
    if let Some(rows) = &data.channel_daily {
        counts.channel_daily = storage.upsert_channel_daily(rows).await?;
        ga_metrics::rows_upserted("channel_daily", counts.channel_daily);
    }
    if let Some(rows) = &data.source_daily {
        counts.source_daily = storage.upsert_source_daily(rows).await?;
        ga_metrics::rows_upserted("source_daily", counts.source_daily);
    }

    info!(
        kpi_daily = counts.kpi_daily,
        kpi_monthly = counts.kpi_monthly,
        channel_daily = counts.channel_daily,
        source_daily = counts.source_daily,
        "Persisted GA rows"
    );
    Ok(counts)
}

/// Drop all stored metrics for a property so the next fetch backfills again.
#[instrument(skip(storage))]
pub async fn reset_property(storage: &dyn Storage, ga_property_id: &str) -> Result<GaRowCounts> {
    let removed = storage.delete_ga_rows(ga_property_id).await?;
    info!(removed = removed.total(), "Reset GA property");
    Ok(removed)
}
