use std::time::Duration;

use config::{Environment, Map};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::grading::{GradingRules, TiePolicy, VoidPolicy};
use crate::settlement::{OrchestratorConfig, SchedulerConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub settlement: SettlementConfig,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/settlement".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            settlement: SettlementConfig::from_env()?,
        })
    }
}

/// Settlement worker tuning, overridable with `SETTLEMENT_*` variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub worker_name: String,
    pub lookback_days: i64,
    pub correction_grace_hours: i64,
    pub max_games_per_cycle: usize,
    pub failed_game_retry_mins: i64,
    pub active_interval_secs: u64,
    pub idle_interval_secs: u64,
    pub recent_final_window_mins: i64,
    pub error_backoff_secs: u64,
    pub failure_threshold: u32,
    pub circuit_cooldown_secs: u64,
    pub tie_policy: TiePolicy,
    pub void_policy: VoidPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            worker_name: "settlement".to_string(),
            lookback_days: 30,
            correction_grace_hours: 72,
            max_games_per_cycle: 100,
            failed_game_retry_mins: 15,
            active_interval_secs: 90,
            idle_interval_secs: 300,
            recent_final_window_mins: 60,
            error_backoff_secs: 60,
            failure_threshold: 5,
            circuit_cooldown_secs: 300,
            tie_policy: TiePolicy::Lose,
            void_policy: VoidPolicy::Exclude,
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::load(None)
    }

    /// Build from defaults overlaid with `SETTLEMENT_*` variables. `vars`
    /// replaces the process environment when given.
    pub fn load(vars: Option<Map<String, String>>) -> AppResult<Self> {
        let defaults = Self::default();

        let settings = config::Config::builder()
            .set_default("worker_name", defaults.worker_name)?
            .set_default("lookback_days", defaults.lookback_days)?
            .set_default("correction_grace_hours", defaults.correction_grace_hours)?
            .set_default("max_games_per_cycle", defaults.max_games_per_cycle as u64)?
            .set_default("failed_game_retry_mins", defaults.failed_game_retry_mins)?
            .set_default("active_interval_secs", defaults.active_interval_secs)?
            .set_default("idle_interval_secs", defaults.idle_interval_secs)?
            .set_default("recent_final_window_mins", defaults.recent_final_window_mins)?
            .set_default("error_backoff_secs", defaults.error_backoff_secs)?
            .set_default("failure_threshold", defaults.failure_threshold)?
            .set_default("circuit_cooldown_secs", defaults.circuit_cooldown_secs)?
            .set_default("tie_policy", "lose")?
            .set_default("void_policy", "exclude")?
            .add_source(
                Environment::with_prefix("SETTLEMENT")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let positive = [
            ("lookback_days", self.lookback_days > 0),
            ("correction_grace_hours", self.correction_grace_hours > 0),
            ("max_games_per_cycle", self.max_games_per_cycle > 0),
            ("failed_game_retry_mins", self.failed_game_retry_mins > 0),
            ("active_interval_secs", self.active_interval_secs > 0),
            ("idle_interval_secs", self.idle_interval_secs > 0),
            ("recent_final_window_mins", self.recent_final_window_mins > 0),
            ("error_backoff_secs", self.error_backoff_secs > 0),
            ("failure_threshold", self.failure_threshold > 0),
            ("circuit_cooldown_secs", self.circuit_cooldown_secs > 0),
        ];

        if let Some((name, _)) = positive.iter().find(|(_, ok)| !ok) {
            return Err(AppError::Config(format!("{} must be greater than zero", name)));
        }
        if self.worker_name.trim().is_empty() {
            return Err(AppError::Config("worker_name must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn rules(&self) -> GradingRules {
        GradingRules {
            tie_policy: self.tie_policy,
            void_policy: self.void_policy,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            lookback: chrono::Duration::days(self.lookback_days),
            correction_grace: chrono::Duration::hours(self.correction_grace_hours),
            max_games_per_cycle: self.max_games_per_cycle,
            failed_game_retry: chrono::Duration::minutes(self.failed_game_retry_mins),
            rules: self.rules(),
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            worker_name: self.worker_name.clone(),
            active_interval: Duration::from_secs(self.active_interval_secs),
            idle_interval: Duration::from_secs(self.idle_interval_secs),
            recent_final_window: chrono::Duration::minutes(self.recent_final_window_mins),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
            failure_threshold: self.failure_threshold,
            circuit_cooldown: Duration::from_secs(self.circuit_cooldown_secs),
        }
    }
}
