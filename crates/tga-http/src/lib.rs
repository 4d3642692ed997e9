//! HTTP trigger (axum).
//!
//! `POST /process-messages/` takes a multipart upload (field `file`, one
//! channel identifier per line) and optional `from_date`/`to_date` query
//! parameters, runs one batch and answers with the batch summary.

use std::{future::Future, sync::Arc};

use axum::{
    extract::{Multipart, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use tga_core::{
    domain::{parse_identifier_list, BatchSummary},
    orchestrator::BatchOrchestrator,
    window::DateWindow,
};

pub mod error;

pub use error::ApiError;

const SERVICE_NAME: &str = "Telegram Message Downloader";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BatchOrchestrator>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/process-messages/", post(process_messages))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves; in-flight requests are allowed to finish.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "http trigger listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn process_messages(
    State(state): State<AppState>,
    Query(q): Query<WindowQuery>,
    mut multipart: Multipart,
) -> Result<Json<BatchSummary>, ApiError> {
    // Bad dates reject the request before anything is read or fetched.
    let window = DateWindow::normalize(q.from_date.as_deref(), q.to_date.as_deref())?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("cannot read upload: {e}")))?;
            upload = Some(bytes);
            break;
        }
    }
    let bytes = upload.ok_or_else(|| ApiError::bad_request("missing multipart field 'file'"))?;
    let content = std::str::from_utf8(&bytes)
        .map_err(|_| ApiError::bad_request("identifier list must be UTF-8 text"))?;

    let identifiers = parse_identifier_list(content);
    tracing::info!(channels = identifiers.len(), %window, "export requested over http");

    let summary = state.orchestrator.run(&identifiers, &window).await?;
    Ok(Json(summary))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}
