//! HTTP endpoints for the cached metrics
//!
//! - `GET /api/metrics` - the cached record plus a staleness string
//! - `POST /api/metrics/refresh` - rebuild the cache (shared secret required)
//! - `GET /health/ping` - liveness check

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::format_elapsed;
use crate::data::{AdMetrics, CachedMetrics, MetricSource, RevenueMetrics, SchedulingMetrics};
use crate::refresh::{Persisted, RefreshError, RefreshOutcome, Refresher};

/// Header carrying the refresh shared secret
pub const REFRESH_SECRET_HEADER: &str = "x-refresh-secret";

// ============================================================================
// TYPES
// ============================================================================

/// Body of `GET /api/metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub google_ads: Option<AdMetrics>,
    pub meta_ads: Option<AdMetrics>,
    pub calendly: Option<SchedulingMetrics>,
    pub stripe: Option<RevenueMetrics>,
    pub last_updated: DateTime<Utc>,
    /// e.g. "3 hours ago"
    pub time_since_update: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<MetricSource, String>>,
}

impl MetricsResponse {
    /// Combined spend across both ad platforms
    pub fn total_ad_spend(&self) -> f64 {
        AdMetrics::combined_spend([&self.google_ads, &self.meta_ads])
    }

    /// Builds the read view of `metrics` as seen at `now`
    pub fn from_cached(metrics: CachedMetrics, now: DateTime<Utc>) -> Self {
        Self {
            time_since_update: format_elapsed(now - metrics.last_updated),
            google_ads: metrics.google_ads,
            meta_ads: metrics.meta_ads,
            calendly: metrics.calendly,
            stripe: metrics.stripe,
            last_updated: metrics.last_updated,
            success: metrics.success,
            errors: metrics.errors,
        }
    }
}

/// Body of `POST /api/metrics/refresh`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub persisted: Persisted,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub reused: Vec<MetricSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<MetricSource, String>>,
}

impl From<RefreshOutcome> for RefreshResponse {
    fn from(outcome: RefreshOutcome) -> Self {
        Self {
            success: outcome.metrics.success,
            persisted: outcome.persisted,
            last_updated: outcome.metrics.last_updated,
            reused: outcome.reused,
            errors: outcome.metrics.errors,
        }
    }
}

/// Error body shared by all endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn error_response(status: StatusCode, error: &str, message: Option<&str>) -> Response {
    let body = ErrorBody {
        error: error.to_string(),
        message: message.map(str::to_string),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub force: bool,
}

// ============================================================================
// STATE
// ============================================================================

pub struct ApiState {
    pub refresher: Arc<Refresher>,
    /// Refresh is disabled over HTTP when unset
    pub refresh_secret: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/metrics
pub async fn read_metrics(State(state): State<Arc<ApiState>>) -> Response {
    match state.refresher.store().read() {
        Some(metrics) => {
            let body = MetricsResponse::from_cached(metrics, Utc::now());
            (StatusCode::OK, Json(body)).into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            "No cached data available",
            Some("Metrics have not been refreshed yet"),
        ),
    }
}

/// POST /api/metrics/refresh
pub async fn trigger_refresh(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<RefreshQuery>,
) -> Response {
    let Some(expected) = state.refresh_secret.as_deref() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Refresh endpoint is not configured",
            None,
        );
    };

    let provided = headers
        .get(REFRESH_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if !provided.is_some_and(|p| secrets_match(p, expected)) {
        warn!("Rejected refresh request with missing or invalid secret");
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized", None);
    }

    match state.refresher.refresh(query.force).await {
        Ok(outcome) => {
            let status = match outcome.persisted {
                Persisted::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::OK,
            };
            (status, Json(RefreshResponse::from(outcome))).into_response()
        }
        Err(e @ RefreshError::InProgress) => {
            error_response(StatusCode::CONFLICT, &e.to_string(), None)
        }
    }
}

/// GET /health/ping
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// Compares secrets without short-circuiting on the first mismatch
fn secrets_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: ApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/api/metrics", get(read_metrics))
        .route("/api/metrics/refresh", post(trigger_refresh))
        .route("/health/ping", get(ping))
        .with_state(state)
}

/// Serves `router` on `addr` until Ctrl-C
pub async fn serve(addr: SocketAddr, router: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
}
