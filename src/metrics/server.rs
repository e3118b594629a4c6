//! Read-only admin HTTP surface.
//!
//! Serves the metrics snapshot, a health probe, and the chat history
//! query/export API. Optionally guarded by an API key carried in a
//! configurable header.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::bootstrap::Shutdown;
use crate::config::HttpConfig;
use crate::history::HistoryStore;
use crate::models::HistoryRecord;
use crate::queue::{QueueError, SharedQueue};

use super::ForwardMetrics;

/// Shared state behind the admin handlers.
pub struct AdminState {
    metrics: Arc<ForwardMetrics>,
    queue: SharedQueue,
    history: Arc<HistoryStore>,
    /// `(header name, expected key)` when API-key auth is enabled.
    auth: Option<(String, String)>,
}

impl AdminState {
    pub fn new(
        metrics: Arc<ForwardMetrics>,
        queue: SharedQueue,
        history: Arc<HistoryStore>,
        config: &HttpConfig,
    ) -> Arc<Self> {
        let auth = if config.auth {
            Some((config.header_name.clone(), config.api_key.clone()))
        } else {
            None
        };

        Arc::new(Self {
            metrics,
            queue,
            history,
            auth,
        })
    }
}

/// Admin HTTP server.
pub struct AdminServer {
    addr: SocketAddr,
    metrics_path: String,
    state: Arc<AdminState>,
}

impl AdminServer {
    pub fn new(addr: SocketAddr, metrics_path: String, state: Arc<AdminState>) -> Self {
        Self {
            addr,
            metrics_path,
            state,
        }
    }

    fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/api/chat/history", get(history_handler))
            .route("/api/chat/history/user", get(history_user_handler))
            .route("/api/chat/history/export", get(history_export_handler));

        // Honor a non-default metrics path from configuration.
        if self.metrics_path != "/metrics" && !self.metrics_path.is_empty() {
            router = router.route(&self.metrics_path, get(metrics_handler));
        }

        router
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_api_key,
            ))
            .with_state(self.state.clone())
    }

    /// Serve until shutdown.
    pub async fn run(self, shutdown: Shutdown) -> std::io::Result<()> {
        let router = self.build_router();

        info!(address = %self.addr, "starting admin server");

        let listener = TcpListener::bind(self.addr).await?;
        let mut stop = shutdown.subscribe();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop.changed().await;
                info!("admin server shutting down");
            })
            .await?;

        Ok(())
    }
}

async fn require_api_key(
    State(state): State<Arc<AdminState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some((header_name, expected)) = &state.auth {
        let provided = request
            .headers()
            .get(header_name.as_str())
            .and_then(|v| v.to_str().ok());

        match provided {
            Some(key) if key == expected => {}
            Some(_) => {
                warn!("admin request rejected: invalid API key");
                return (StatusCode::UNAUTHORIZED, "invalid API key").into_response();
            }
            None => {
                warn!("admin request rejected: missing API key");
                return (StatusCode::UNAUTHORIZED, "missing API key").into_response();
            }
        }
    }

    next.run(request).await
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn metrics_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    // Refresh the gauge so the snapshot reflects the live queue.
    match state.queue.size() {
        Ok(size) => state.metrics.set_queue_size(size),
        Err(QueueError::Closed) => {}
        Err(e) => warn!(error = %e, "failed to read queue size for metrics"),
    }

    Json(state.metrics.snapshot())
}

#[derive(Debug, Deserialize)]
struct RangeParams {
    chat_id: i64,
    start_time: String,
    end_time: String,
}

#[derive(Debug, Deserialize)]
struct UserParams {
    chat_id: i64,
    username: String,
    start_time: String,
    end_time: String,
}

#[derive(Debug, Deserialize)]
struct ExportParams {
    chat_id: i64,
    start_time: String,
    end_time: String,
    username: Option<String>,
}

type HandlerError = (StatusCode, String);

fn parse_rfc3339(value: &str, name: &str) -> Result<DateTime<Utc>, HandlerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid {name}")))
}

fn internal(err: anyhow::Error) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("query failed: {err}"))
}

async fn history_handler(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<HistoryRecord>>, HandlerError> {
    let start = parse_rfc3339(&params.start_time, "start_time")?;
    let end = parse_rfc3339(&params.end_time, "end_time")?;

    let records = state
        .history
        .query_range(params.chat_id, &start, &end)
        .map_err(internal)?;

    Ok(Json(records))
}

async fn history_user_handler(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<UserParams>,
) -> Result<Json<Vec<HistoryRecord>>, HandlerError> {
    if params.username.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "username is required".into()));
    }

    let start = parse_rfc3339(&params.start_time, "start_time")?;
    let end = parse_rfc3339(&params.end_time, "end_time")?;

    let records = state
        .history
        .query_user(params.chat_id, &params.username, &start, &end)
        .map_err(internal)?;

    Ok(Json(records))
}

async fn history_export_handler(
    State(state): State<Arc<AdminState>>,
    Query(params): Query<ExportParams>,
) -> Result<Response, HandlerError> {
    let start = parse_rfc3339(&params.start_time, "start_time")?;
    let end = parse_rfc3339(&params.end_time, "end_time")?;

    let mut body = Vec::new();
    state
        .history
        .export_csv(
            params.chat_id,
            params.username.as_deref(),
            &start,
            &end,
            &mut body,
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("export failed: {e}")))?;

    let filename = format!(
        "chat_history_{}_{}.csv",
        params.chat_id,
        Utc::now().format("%Y%m%d_%H%M%S")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        body,
    )
        .into_response())
}
