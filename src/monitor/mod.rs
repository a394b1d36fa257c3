//! Liveness and health endpoint
//!
//! The scheduler updates a shared [`Liveness`] handle after every cycle.
//! `GET /health` answers 200 while the last successful cycle is recent and
//! 503 once it goes stale or the scheduler has stopped. `GET /status`
//! returns the full snapshot as JSON.

use crate::scanner::CycleSummary;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct LivenessSnapshot {
    pub state: String,
    pub started_at: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub last_summary: Option<CycleSummary>,
    pub stopped: Option<String>,
}

/// Shared scheduler liveness
#[derive(Debug, Clone)]
pub struct Liveness {
    inner: Arc<RwLock<LivenessSnapshot>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Liveness {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LivenessSnapshot {
                state: "idle".to_string(),
                started_at,
                last_success: None,
                last_failure: None,
                cycles: 0,
                last_summary: None,
                stopped: None,
            })),
        }
    }

    pub fn set_state(&self, state: &str) {
        self.inner.write().state = state.to_string();
    }

    pub fn record_success(&self, now: DateTime<Utc>, summary: CycleSummary) {
        let mut inner = self.inner.write();
        inner.last_success = Some(now);
        inner.cycles += 1;
        inner.last_summary = Some(summary);
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        inner.last_failure = Some(now);
        inner.cycles += 1;
    }

    pub fn stop(&self, reason: &str) {
        let mut inner = self.inner.write();
        inner.state = "stopped".to_string();
        inner.stopped = Some(reason.to_string());
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        self.inner.read().clone()
    }

    /// Healthy when not stopped and the last success (or startup, before
    /// the first success) is within `stale_after`
    pub fn is_healthy(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let inner = self.inner.read();
        if inner.stopped.is_some() {
            return false;
        }
        let reference = inner.last_success.unwrap_or(inner.started_at);
        now - reference <= stale_after
    }
}

#[derive(Clone)]
pub struct HealthState {
    pub liveness: Liveness,
    pub stale_after: Duration,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub healthy: bool,
    #[serde(flatten)]
    pub liveness: LivenessSnapshot,
}

async fn health_check(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    if state.liveness.is_healthy(Utc::now(), state.stale_after) {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "STALE")
    }
}

async fn get_status(State(state): State<HealthState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        healthy: state.liveness.is_healthy(Utc::now(), state.stale_after),
        liveness: state.liveness.snapshot(),
    })
}

pub fn create_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .with_state(state)
}

/// Serve the health endpoints until the process exits
pub async fn start_health_server(
    liveness: Liveness,
    port: u16,
    stale_after: Duration,
) -> std::io::Result<()> {
    let app = create_router(HealthState {
        liveness,
        stale_after,
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Health server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
