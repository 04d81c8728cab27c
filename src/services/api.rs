//! Read-only HTTP view over the store
//!
//! Every process serves this regardless of leadership. Handlers never write;
//! when the engine is behind they return the last stored data with its age.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::adapters::{Partition, Store};
use crate::coordination::ShutdownToken;
use crate::domain::{EventRecord, EventStatus};
use crate::error::{LivescoreError, Result};
use crate::services::Metrics;

/// Shared state for the API handlers
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub metrics: Arc<Metrics>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LiveResponse {
    pub count: usize,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Seconds since the last completed cycle
    pub age_seconds: Option<i64>,
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: i64,
    pub leader: bool,
    pub store_reachable: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/live", get(live_handler))
        .route("/events/:id", get(event_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// All Active events with the freshness of the data
async fn live_handler(State(state): State<Arc<ApiState>>) -> Response {
    let mut events = match state
        .store
        .query_by_status(Partition::Active, EventStatus::Active)
        .await
    {
        Ok(events) => events,
        Err(e) => {
            error!("Live query failed: {}", e);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "store unavailable");
        }
    };

    let last_cycle_at = state.metrics.last_cycle_at();
    if last_cycle_at.is_none() && events.is_empty() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "no cycle has completed yet",
        );
    }

    events.sort_by(|a, b| a.id.cmp(&b.id));
    Json(LiveResponse {
        count: events.len(),
        last_cycle_at,
        age_seconds: last_cycle_at.map(|at| (Utc::now() - at).num_seconds()),
        events,
    })
    .into_response()
}

/// One event from the active partition
async fn event_handler(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.store.get(Partition::Active, &id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("event {} not found", id)),
        Err(e) => {
            error!(id = %id, "Event lookup failed: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> Response {
    let store_reachable = state.store.ping().await.is_ok();
    let body = HealthResponse {
        status: if store_reachable { "ok" } else { "degraded" },
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        leader: state.metrics.is_leader(),
        store_reachable,
        last_cycle_at: state.metrics.last_cycle_at(),
    };
    let code = if store_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.prometheus(),
    )
}

pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    pub fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until shutdown is requested
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let app = router(Arc::clone(&self.state));
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting read API on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| LivescoreError::Internal(format!("API server error: {}", e)))?;

        info!("Read API stopped");
        Ok(())
    }
}
