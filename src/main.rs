use parlay_settlement::{bootstrap, config::Config, init_tracing, server};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before tracing so RUST_LOG from the file is honoured
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting parlay settlement worker");

    let config = Config::from_env()?;
    let worker = bootstrap::initialize_worker(&config).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = worker.scheduler.start(stop_rx.clone());

    let app = server::create_app(worker.health);
    let server = tokio::spawn({
        let bind_address = config.bind_address.clone();
        async move { server::run_server(app, &bind_address, stop_rx).await }
    });

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown requested, finishing the in-flight cycle...");
    stop_tx.send(true).ok();

    if let Err(err) = scheduler.await {
        error!("Settlement scheduler task failed: {}", err);
    }
    match server.await {
        Ok(Err(err)) => error!("Health server failed: {}", err),
        Err(err) => error!("Health server task failed: {}", err),
        Ok(Ok(())) => {}
    }

    info!("👋 Settlement worker stopped");
    Ok(())
}
