use super::assembly::DashboardSource;
use super::rows::DateRange;
use crate::config::MetricsServiceConfig;
use crate::error::{PortalError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DashboardRequest<'a> {
    ga_property_id: &'a str,
    start_date: String,
    end_date: String,
}

/// HTTP client for the analytics/LLM service that produces dashboard payloads
pub struct MetricsServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl MetricsServiceClient {
    pub fn new(config: &MetricsServiceConfig) -> Result<Self> {
        let base_url = config.require_base_url()?.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self { client, base_url })
    }

    pub fn dashboard_url(&self) -> String {
        format!("{}/dashboard", self.base_url)
    }
}

#[async_trait]
impl DashboardSource for MetricsServiceClient {
    #[instrument(skip(self))]
    async fn fetch_dashboard(&self, ga_property_id: &str, window: &DateRange) -> Result<Value> {
        let body = DashboardRequest {
            ga_property_id,
            start_date: window.from.to_string(),
            end_date: window.to.to_string(),
        };
        let resp = self.client.post(self.dashboard_url()).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PortalError::Transform(format!(
                "metrics service returned {} for property {}",
                status.as_u16(),
                ga_property_id
            )));
        }
        let payload: Value = resp.json().await?;
        debug!("Received dashboard payload");
        Ok(payload)
    }
}
