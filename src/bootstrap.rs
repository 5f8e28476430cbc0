use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    config::Config,
    error::AppResult,
    ledger::repository::PgSettlementRepository,
    server::HealthState,
    settlement::{SettlementOrchestrator, SettlementScheduler},
};

/// Fully wired settlement worker, ready to start
pub struct Worker {
    pub scheduler: SettlementScheduler,
    pub health: HealthState,
}

pub async fn initialize_worker(config: &Config) -> AppResult<Worker> {
    info!("Initializing settlement components ...");

    let pool = initialize_database(&config.database_url).await?;
    let repository = Arc::new(PgSettlementRepository::new(pool));

    let orchestrator_config = config.settlement.orchestrator();
    info!(
        "✅ Orchestrator configured: lookback {}d, correction grace {}h, cap {} games/cycle, failed games retried after {}m",
        orchestrator_config.lookback.num_days(),
        orchestrator_config.correction_grace.num_hours(),
        orchestrator_config.max_games_per_cycle,
        orchestrator_config.failed_game_retry.num_minutes()
    );
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        repository.clone(),
        repository.clone(),
        repository.clone(),
        orchestrator_config,
    ));

    let scheduler_config = config.settlement.scheduler();
    info!(
        "✅ Scheduler configured: {}s active / {}s idle, circuit opens after {} failures",
        scheduler_config.active_interval.as_secs(),
        scheduler_config.idle_interval.as_secs(),
        scheduler_config.failure_threshold
    );
    let idle_interval = scheduler_config.idle_interval;
    let scheduler = SettlementScheduler::new(
        scheduler_config,
        orchestrator,
        repository.clone(),
        repository.clone(),
        repository,
    );

    let health = HealthState::new(scheduler.status(), idle_interval);

    Ok(Worker { scheduler, health })
}

pub async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 10 max connections");

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
