use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::settlement::{SchedulerState, SchedulerStatus, SharedStatus};

/// How many idle intervals may pass without a heartbeat before the worker is
/// reported unhealthy
const STALE_AFTER_IDLE_INTERVALS: u32 = 3;

#[derive(Clone)]
pub struct HealthState {
    status: SharedStatus,
    stale_after: chrono::Duration,
}

impl HealthState {
    pub fn new(status: SharedStatus, idle_interval: Duration) -> Self {
        let stale_after = chrono::Duration::from_std(idle_interval * STALE_AFTER_IDLE_INTERVALS)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        Self { status, stale_after }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub reason: Option<String>,
    pub worker_name: String,
    pub state: SchedulerState,
    pub last_beat_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub circuit_opened_at: Option<DateTime<Utc>>,
}

/// Judge the worker's health from its latest status snapshot
pub fn evaluate(status: &SchedulerStatus, now: DateTime<Utc>, stale_after: chrono::Duration) -> HealthReport {
    let reason = match (status.state, status.last_beat_at) {
        (SchedulerState::CircuitOpen, _) => Some("circuit open".to_string()),
        (SchedulerState::Stopped, _) => Some("scheduler stopped".to_string()),
        (SchedulerState::Starting, None) => None,
        (_, None) => Some("no heartbeat recorded".to_string()),
        (_, Some(at)) if now - at > stale_after => {
            Some(format!("last heartbeat {}s ago", (now - at).num_seconds()))
        }
        _ => None,
    };

    HealthReport {
        healthy: reason.is_none(),
        reason,
        worker_name: status.worker_name.clone(),
        state: status.state,
        last_beat_at: status.last_beat_at,
        consecutive_failures: status.consecutive_failures,
        circuit_opened_at: status.circuit_opened_at,
    }
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = {
        let status = state.status.read();
        evaluate(&status, Utc::now(), state.stale_after)
    };

    let code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

pub async fn settlement_status(State(state): State<HealthState>) -> Json<SchedulerStatus> {
    Json(state.status.read().clone())
}

pub fn create_app(state: HealthState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        .route("/health", get(health))
        .route("/settlement/status", get(settlement_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_stop(shutdown))
        .await?;
    Ok(())
}

async fn wait_for_stop(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
