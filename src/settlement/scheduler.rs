// Settlement Scheduler - runs the orchestrator on an adaptive cadence
//
// - 90s between cycles while games are live or just went final, 300s otherwise
// - Isolated failure: short error backoff, then back to the normal cadence
// - Repeated failures: circuit opens, cycles are skipped until the cooldown ends
// - Every tick writes a heartbeat for external monitoring
//
// Cycles never overlap: the loop awaits a whole cycle before sleeping, and a
// stop signal is only honoured between cycles.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::ledger::models::AlertSeverity;
use crate::settlement::breaker::{BreakerState, CircuitBreaker, FailureOutcome};
use crate::settlement::orchestrator::{CycleReport, SettlementOrchestrator};
use crate::settlement::traits::{AlertSink, GameRepository, HeartbeatStore};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_name: String,
    /// Interval while games are live or recently final
    pub active_interval: Duration,
    pub idle_interval: Duration,
    /// How recently a game must have gone final to count as activity
    pub recent_final_window: chrono::Duration,
    pub error_backoff: Duration,
    pub failure_threshold: u32,
    /// Open-circuit pause; also the sleep between skipped cycles
    pub circuit_cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_name: "settlement".to_string(),
            active_interval: Duration::from_secs(90),
            idle_interval: Duration::from_secs(300),
            recent_final_window: chrono::Duration::hours(1),
            error_backoff: Duration::from_secs(60),
            failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Starting,
    Running,
    ErrorBackoff,
    CircuitOpen,
    HalfOpen,
    Stopped,
}

/// Snapshot of the scheduler, shared with the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub worker_name: String,
    pub state: SchedulerState,
    pub consecutive_failures: u32,
    pub last_beat_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub circuit_opened_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_report: Option<CycleReport>,
    pub next_delay_secs: u64,
}

impl SchedulerStatus {
    fn new(worker_name: &str) -> Self {
        Self {
            worker_name: worker_name.to_string(),
            state: SchedulerState::Starting,
            consecutive_failures: 0,
            last_beat_at: None,
            last_success_at: None,
            circuit_opened_at: None,
            last_error: None,
            last_report: None,
            next_delay_secs: 0,
        }
    }
}

pub type SharedStatus = Arc<RwLock<SchedulerStatus>>;

pub struct SettlementScheduler {
    config: SchedulerConfig,
    orchestrator: Arc<SettlementOrchestrator>,
    games: Arc<dyn GameRepository>,
    heartbeat: Arc<dyn HeartbeatStore>,
    alerts: Arc<dyn AlertSink>,
    breaker: CircuitBreaker,
    status: SharedStatus,
}

impl SettlementScheduler {
    pub fn new(
        config: SchedulerConfig,
        orchestrator: Arc<SettlementOrchestrator>,
        games: Arc<dyn GameRepository>,
        heartbeat: Arc<dyn HeartbeatStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let cooldown = chrono::Duration::from_std(config.circuit_cooldown)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let breaker = CircuitBreaker::new(config.failure_threshold, cooldown);
        let status = Arc::new(RwLock::new(SchedulerStatus::new(&config.worker_name)));

        Self {
            config,
            orchestrator,
            games,
            heartbeat,
            alerts,
            breaker,
            status,
        }
    }

    /// Handle for reading the scheduler's state from other tasks
    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Start the scheduler (runs in background until `shutdown` turns true)
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.config.worker_name, "🔄 Settlement scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = self.tick(Utc::now()).await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.status.write().state = SchedulerState::Stopped;
        info!(worker = %self.config.worker_name, "✓ Settlement scheduler stopped");
    }

    /// Run (or skip) one cycle at `now` and return how long to sleep before
    /// the next one.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Duration {
        if !self.breaker.allow(now) {
            info!("⛔ Circuit open, skipping settlement cycle");
            let delay = self.config.circuit_cooldown;
            self.update_status(SchedulerState::CircuitOpen, now, delay, |_| {});
            self.beat(now, None).await;
            return delay;
        }

        if self.breaker.state() == BreakerState::HalfOpen {
            warn!("🔁 Circuit cooldown elapsed, resuming with a fresh failure count");
            self.status.write().state = SchedulerState::HalfOpen;
        }

        match self.orchestrator.run_cycle(now).await {
            Ok(report) => {
                self.breaker.record_success();
                let delay = self.next_interval(now, &report).await;
                self.update_status(SchedulerState::Running, now, delay, |status| {
                    status.last_success_at = Some(now);
                    status.last_error = None;
                    status.last_report = Some(report.clone());
                });
                self.beat(now, Some(&report)).await;
                delay
            }
            Err(err) => {
                let message = err.to_string();
                let outcome = self.breaker.record_failure(now);
                error!("❌ Settlement cycle failed: {}", message);

                self.alert(
                    "settlement_cycle_failed",
                    AlertSeverity::Warning,
                    json!({
                        "error": message,
                        "consecutive_failures": self.breaker.consecutive_failures(),
                    }),
                )
                .await;

                let (state, delay) = match outcome {
                    FailureOutcome::Backoff { consecutive_failures } => {
                        warn!(
                            "Backing off {}s after failure {}/{}",
                            self.config.error_backoff.as_secs(),
                            consecutive_failures,
                            self.config.failure_threshold
                        );
                        (SchedulerState::ErrorBackoff, self.config.error_backoff)
                    }
                    FailureOutcome::Opened { consecutive_failures } => {
                        error!(
                            "🚨 Circuit opened after {} consecutive failures; pausing {}s",
                            consecutive_failures,
                            self.config.circuit_cooldown.as_secs()
                        );
                        self.alert(
                            "settlement_circuit_open",
                            AlertSeverity::Critical,
                            json!({
                                "consecutive_failures": consecutive_failures,
                                "opened_at": now,
                                "cooldown_secs": self.config.circuit_cooldown.as_secs(),
                                "last_error": message,
                            }),
                        )
                        .await;
                        (SchedulerState::CircuitOpen, self.config.circuit_cooldown)
                    }
                };

                self.update_status(state, now, delay, |status| {
                    status.last_error = Some(message.clone());
                });
                self.beat(now, None).await;
                delay
            }
        }
    }

    async fn next_interval(&self, now: DateTime<Utc>, report: &CycleReport) -> Duration {
        if report.deferred {
            return self.config.active_interval;
        }

        match self.games.has_recent_activity(now - self.config.recent_final_window).await {
            Ok(true) => self.config.active_interval,
            Ok(false) => self.config.idle_interval,
            Err(err) => {
                warn!("⚠️ Could not check game activity, using idle cadence: {}", err);
                self.config.idle_interval
            }
        }
    }

    fn update_status(
        &self,
        state: SchedulerState,
        now: DateTime<Utc>,
        delay: Duration,
        extra: impl FnOnce(&mut SchedulerStatus),
    ) {
        let mut status = self.status.write();
        status.state = state;
        status.consecutive_failures = self.breaker.consecutive_failures();
        status.circuit_opened_at = self.breaker.opened_at();
        status.last_beat_at = Some(now);
        status.next_delay_secs = delay.as_secs();
        extra(&mut status);
    }

    async fn beat(&self, now: DateTime<Utc>, report: Option<&CycleReport>) {
        let meta = {
            let status = self.status.read();
            json!({
                "state": status.state,
                "consecutive_failures": status.consecutive_failures,
                "circuit_opened_at": status.circuit_opened_at,
                "next_delay_secs": status.next_delay_secs,
                "report": report,
            })
        };

        if let Err(err) = self.heartbeat.upsert(&self.config.worker_name, now, meta).await {
            warn!("⚠️ Failed to write heartbeat: {}", err);
        }
    }

    async fn alert(&self, event_name: &str, severity: AlertSeverity, context: serde_json::Value) {
        if let Err(err) = self.alerts.emit(event_name, severity, context).await {
            warn!("⚠️ Failed to emit {} alert: {}", event_name, err);
        }
    }
}
