//! Local stand-in for the Drive v3 API used by the integration tests.
#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use portal_ingest::config::DriveConfig;
use serde_json::json;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct FakeFile {
    pub id: &'static str,
    pub name: &'static str,
    pub mime_type: &'static str,
    /// `None` makes the download answer 500
    pub body: Option<&'static str>,
}

#[derive(Clone, Default)]
pub struct FakeDrive {
    files: Arc<Vec<FakeFile>>,
    /// Strategies rejected with 403, by the name of their distinguishing param
    reject_params: Arc<Vec<&'static str>>,
    page_size: usize,
    pub list_requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl FakeDrive {
    pub fn new(files: Vec<FakeFile>) -> Self {
        Self { files: Arc::new(files), page_size: 2, ..Default::default() }
    }

    pub fn rejecting(mut self, params: &[&'static str]) -> Self {
        self.reject_params = Arc::new(params.to_vec());
        self
    }

    pub fn recorded_list_requests(&self) -> Vec<HashMap<String, String>> {
        self.list_requests.lock().unwrap().clone()
    }

    /// Serve on an ephemeral localhost port; returns the base URL.
    pub fn spawn(self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let app = Router::new()
            .route("/files", get(list_files))
            .route("/files/:id", get(get_media))
            .route("/files/:id/export", get(export_csv))
            .with_state(self);
        let server = axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service());
        tokio::spawn(server);

        format!("http://{}", addr)
    }

    pub fn config(base_url: &str) -> DriveConfig {
        DriveConfig {
            api_key: Some("test-key".to_string()),
            base_url: base_url.to_string(),
            source_folder_id: Some("folder-1".to_string()),
            request_timeout_secs: 5,
            page_size: 2,
        }
    }
}

async fn list_files(State(drive): State<FakeDrive>, Query(params): Query<HashMap<String, String>>) -> Response {
    drive.list_requests.lock().unwrap().push(params.clone());

    if drive.reject_params.iter().any(|p| params.contains_key(*p)) {
        return (StatusCode::FORBIDDEN, "insufficient permissions").into_response();
    }
    if params.get("key").map(String::as_str) != Some("test-key") {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }

    let offset: usize = params.get("pageToken").and_then(|t| t.parse().ok()).unwrap_or(0);
    let page: Vec<_> = drive
        .files
        .iter()
        .skip(offset)
        .take(drive.page_size)
        .map(|f| json!({ "id": f.id, "name": f.name, "mimeType": f.mime_type }))
        .collect();
    let next = offset + page.len();
    let mut body = json!({ "files": page });
    if next < drive.files.len() {
        body["nextPageToken"] = json!(next.to_string());
    }
    Json(body).into_response()
}

fn file_body(drive: &FakeDrive, id: &str) -> Response {
    match drive.files.iter().find(|f| f.id == id) {
        Some(FakeFile { body: Some(body), .. }) => (*body).into_response(),
        Some(_) => (StatusCode::INTERNAL_SERVER_ERROR, "backend error").into_response(),
        None => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}

async fn get_media(
    State(drive): State<FakeDrive>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("alt").map(String::as_str) != Some("media") {
        return (StatusCode::BAD_REQUEST, "expected alt=media").into_response();
    }
    file_body(&drive, &id)
}

async fn export_csv(
    State(drive): State<FakeDrive>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("mimeType").map(String::as_str) != Some("text/csv") {
        return (StatusCode::BAD_REQUEST, "expected mimeType=text/csv").into_response();
    }
    file_body(&drive, &id)
}
