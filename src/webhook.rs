//! LLM / analytics webhook handling.
//!
//! The metrics service answers queries asynchronously by posting a webhook.
//! Deliveries for a query that already reached `COMPLETED` or `FAILED` are
//! accepted and ignored, so the service can retry freely.

use crate::error::{PortalError, Result};
use crate::ga::persist::import_llm_dashboard;
use crate::ga::rows::GaRowCounts;
use crate::observability::metrics::webhook as webhook_metrics;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueryStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, QueryStatus::Completed | QueryStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "PENDING",
            QueryStatus::Processing => "PROCESSING",
            QueryStatus::Completed => "COMPLETED",
            QueryStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(QueryStatus::Pending),
            "PROCESSING" => Some(QueryStatus::Processing),
            "COMPLETED" => Some(QueryStatus::Completed),
            "FAILED" => Some(QueryStatus::Failed),
            _ => None,
        }
    }
}

/// What the query asked for. Dashboard answers are imported into the GA tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Chat,
    Dashboard,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Chat => "chat",
            QueryKind::Dashboard => "dashboard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(QueryKind::Chat),
            "dashboard" => Some(QueryKind::Dashboard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmQuery {
    pub id: String,
    pub kind: QueryKind,
    pub ga_property_id: Option<String>,
    pub prompt: String,
    pub status: QueryStatus,
    pub response: Option<Value>,
    pub error: Option<String>,
    pub line_graph_data: Option<Value>,
    pub pie_graph_data: Option<Value>,
    pub metric_headers: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LlmQuery {
    pub fn new(id: impl Into<String>, kind: QueryKind, ga_property_id: Option<String>, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            ga_property_id,
            prompt: prompt.into(),
            status: QueryStatus::Pending,
            response: None,
            error: None,
            line_graph_data: None,
            pie_graph_data: None,
            metric_headers: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body posted by the metrics service
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "queryId", alias = "query_id")]
    pub query_id: String,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub line_graph_data: Option<Value>,
    #[serde(default)]
    pub pie_graph_data: Option<Value>,
    #[serde(default)]
    pub metric_headers: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Completed { imported: Option<GaRowCounts> },
    Failed { error: String },
    AlreadyFinal { status: QueryStatus },
}

/// Register a query before it is sent to the metrics service.
pub async fn register_query(storage: &dyn Storage, query: LlmQuery) -> Result<LlmQuery> {
    if storage.get_llm_query(&query.id).await?.is_some() {
        return Err(PortalError::Storage(format!("query {} already exists", query.id)));
    }
    storage.save_llm_query(&query).await?;
    Ok(query)
}

#[instrument(skip(storage, payload), fields(query_id = %payload.query_id))]
pub async fn handle_webhook(storage: &dyn Storage, payload: WebhookPayload) -> Result<WebhookOutcome> {
    webhook_metrics::received();

    let mut query = storage
        .get_llm_query(&payload.query_id)
        .await?
        .ok_or_else(|| PortalError::NotFound(format!("query {}", payload.query_id)))?;

    if query.status.is_final() {
        info!(status = query.status.as_str(), "Ignoring webhook for finished query");
        webhook_metrics::ignored();
        return Ok(WebhookOutcome::AlreadyFinal { status: query.status });
    }

    query.updated_at = Utc::now();
    query.line_graph_data = payload.line_graph_data;
    query.pie_graph_data = payload.pie_graph_data;
    query.metric_headers = payload.metric_headers;

    if let Some(error) = payload.error.filter(|e| !e.trim().is_empty()) {
        warn!(%error, "Metrics service reported a failed query");
        query.status = QueryStatus::Failed;
        query.error = Some(error.clone());
        if !storage.finalize_llm_query(&query).await? {
            return finished_elsewhere(storage, &query.id).await;
        }
        return Ok(WebhookOutcome::Failed { error });
    }

    let mut imported = None;
    if let (QueryKind::Dashboard, Some(property), Some(response)) =
        (query.kind, query.ga_property_id.as_deref(), payload.response.as_ref())
    {
        match import_llm_dashboard(storage, property, response).await {
            Ok(counts) => imported = Some(counts),
            Err(e) => {
                warn!("Dashboard response could not be imported: {}", e);
                query.status = QueryStatus::Failed;
                query.error = Some(e.to_string());
                query.response = payload.response;
                if !storage.finalize_llm_query(&query).await? {
                    return finished_elsewhere(storage, &query.id).await;
                }
                return Ok(WebhookOutcome::Failed { error: e.to_string() });
            }
        }
    }

    query.status = QueryStatus::Completed;
    query.response = payload.response;
    if !storage.finalize_llm_query(&query).await? {
        return finished_elsewhere(storage, &query.id).await;
    }
    info!("Query completed");
    Ok(WebhookOutcome::Completed { imported })
}

/// A concurrent delivery finalized the query between our read and our write.
async fn finished_elsewhere(storage: &dyn Storage, query_id: &str) -> Result<WebhookOutcome> {
    let status = storage
        .get_llm_query(query_id)
        .await?
        .map(|q| q.status)
        .ok_or_else(|| PortalError::NotFound(format!("query {}", query_id)))?;
    info!(status = status.as_str(), "Query was finished by another delivery");
    webhook_metrics::ignored();
    Ok(WebhookOutcome::AlreadyFinal { status })
}
