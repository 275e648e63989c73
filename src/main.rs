use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use novodom::cli::{self, Cli, Command};
use novodom::config::Config;
use novodom::engine::Engine;
use novodom::notify::NotifyHub;
use novodom::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify)?);

    match cli.command {
        Command::Run => run_daemon(engine, &config).await?,
        command => print!("{}", cli::execute(&engine, command).await?),
    }
    Ok(())
}

async fn run_daemon(engine: Arc<Engine>, config: &Config) -> std::io::Result<()> {
    novodom::observability::init(config.metrics_port);

    info!("novodom daemon started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(sweeper::run_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.sweep_interval,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received, stopping background tasks");
    sweeper.abort();
    compactor.abort();

    // Leave a compact log behind; every acknowledged write is already durable.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("novodom stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
