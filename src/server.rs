use crate::auth::{self, Action, Actor, Resource, Role};
use crate::error::PortalError;
use crate::ga::{reset_property, DateRange, GaMetricsService};
use crate::storage::Storage;
use crate::sync::RecipientSyncService;
use crate::webhook::{handle_webhook, register_query, LlmQuery, QueryKind, WebhookPayload};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{Duration, Local, NaiveDate};
use hyper::Server;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub const HEADER_ACTOR_ID: &str = "x-actor-id";
pub const HEADER_ACTOR_ROLE: &str = "x-actor-role";
pub const HEADER_ACTOR_PROPERTIES: &str = "x-actor-properties";

/// Default display window when the caller sends no dates
const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub ga: Arc<GaMetricsService>,
    /// Absent when no Drive credentials are configured
    pub sync: Option<Arc<RecipientSyncService>>,
}

/// Error body returned by every handler
pub struct ApiError(PortalError);

impl From<PortalError> for ApiError {
    fn from(e: PortalError) -> Self {
        Self(e)
    }
}

pub fn status_for(err: &PortalError) -> StatusCode {
    match err {
        PortalError::Forbidden(_) => StatusCode::FORBIDDEN,
        PortalError::NotFound(_) => StatusCode::NOT_FOUND,
        PortalError::Json(_) | PortalError::Transform(_) => StatusCode::BAD_REQUEST,
        PortalError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortalError::Drive { .. } | PortalError::Download { .. } | PortalError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Caller identity carried in headers set by the session layer in front of us
pub struct HeaderActor(pub Actor);

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, PortalError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

    let id = header(HEADER_ACTOR_ID)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PortalError::Forbidden(format!("missing {} header", HEADER_ACTOR_ID)))?;
    let role = header(HEADER_ACTOR_ROLE)
        .and_then(Role::parse)
        .ok_or_else(|| PortalError::Forbidden(format!("missing or unknown {} header", HEADER_ACTOR_ROLE)))?;
    let properties = header(HEADER_ACTOR_PROPERTIES)
        .map(|v| v.split(',').map(str::trim).filter(|p| !p.is_empty()).map(String::from).collect::<Vec<_>>())
        .unwrap_or_default();

    Ok(Actor::new(id, role).with_properties(properties))
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for HeaderActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(HeaderActor(actor_from_headers(&parts.headers)?))
    }
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl RangeParams {
    fn into_range(self, today: NaiveDate) -> DateRange {
        let to = self.to.unwrap_or(today);
        let from = self.from.unwrap_or(to - Duration::days(DEFAULT_WINDOW_DAYS));
        DateRange::new(from, to)
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "portal_ingest",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn admin_ga_metrics(
    State(state): State<AppState>,
    HeaderActor(actor): HeaderActor,
    Path(property): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Response, ApiError> {
    if actor.role == Role::Client {
        return Err(PortalError::Forbidden("admin endpoint".to_string()).into());
    }
    let requested = params.into_range(Local::now().date_naive());
    let response = state.ga.fetch(&actor, &property, requested).await?;
    Ok(Json(response).into_response())
}

async fn client_ga_metrics(
    State(state): State<AppState>,
    HeaderActor(actor): HeaderActor,
    Path(property): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Response, ApiError> {
    let requested = params.into_range(Local::now().date_naive());
    let response = state.ga.fetch(&actor, &property, requested).await?;
    Ok(Json(response).into_response())
}

async fn admin_reset_property(
    State(state): State<AppState>,
    HeaderActor(actor): HeaderActor,
    Path(property): Path<String>,
) -> Result<Response, ApiError> {
    auth::ensure(&actor, Resource::GaProperty(&property), Action::Delete)?;
    let removed = reset_property(state.storage.as_ref(), &property).await?;
    Ok(Json(removed).into_response())
}

async fn admin_sync_recipients(
    State(state): State<AppState>,
    HeaderActor(actor): HeaderActor,
) -> Result<Response, ApiError> {
    auth::ensure(&actor, Resource::RecipientSync, Action::Execute)?;
    let service = state
        .sync
        .as_ref()
        .ok_or_else(|| PortalError::Config("recipient sync is not configured".to_string()))?;
    let summary = service.sync_and_persist_recipients().await?;
    Ok(Json(summary).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuery {
    pub id: String,
    pub kind: QueryKind,
    #[serde(default)]
    pub ga_property_id: Option<String>,
    #[serde(default)]
    pub prompt: String,
}

async fn create_llm_query(
    State(state): State<AppState>,
    HeaderActor(actor): HeaderActor,
    Json(body): Json<NewQuery>,
) -> Result<Response, ApiError> {
    auth::ensure(&actor, Resource::LlmQueries, Action::Write)?;
    if let Some(property) = body.ga_property_id.as_deref() {
        auth::ensure(&actor, Resource::GaProperty(property), Action::Read)?;
    }
    let query = LlmQuery::new(body.id, body.kind, body.ga_property_id, body.prompt);
    let saved = register_query(state.storage.as_ref(), query).await?;
    Ok((StatusCode::CREATED, Json(saved)).into_response())
}

async fn llm_webhook(State(state): State<AppState>, Json(payload): Json<WebhookPayload>) -> Result<Response, ApiError> {
    let outcome = handle_webhook(state.storage.as_ref(), payload).await?;
    Ok(Json(outcome).into_response())
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/admin/ga-metrics/:property", get(admin_ga_metrics).delete(admin_reset_property))
        .route("/client/ga-metrics/:property", get(client_ga_metrics))
        .route("/admin/recipients/sync", post(admin_sync_recipients))
        .route("/admin/llm-queries", post(create_llm_query))
        .route("/webhooks/llm", post(llm_webhook))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("HTTP server listening on http://{}", addr);
    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}
