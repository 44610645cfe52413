use crate::config::parse::load_config;
use crate::config::types::{RemoteBackend, RemoteConfig};
use crate::poll::{PollScheduler, SchedulerError};
use crate::remote::{AwsLogStore, HttpLogStore, LogStore, RemoteError};
use crate::sink::StdoutSink;
use crate::state::StateStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("remote client error: {0}")]
    Remote(#[from] RemoteError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logpull/config.yml");
            eprintln!("  /etc/logpull/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logpull config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_poller(&config_path).await.map_err(|e| e.into())
}

async fn run_poller(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");

    // Config conflicts are fatal here, before anything is polled
    let config = load_config(config_path)?;

    let store = build_store(&config.remote).await?;

    let state = StateStore::load(&config.state_file).await;

    let scheduler = PollScheduler::from_config(
        &config,
        store,
        Arc::new(StdoutSink),
        state,
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    info!("Poller started, press Ctrl+C to shutdown");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, finishing current cycle");
            let _ = shutdown_tx.send(true);
        }
        result = &mut scheduler_handle => {
            // The scheduler only returns on shutdown, so this is unexpected
            let state = result?;
            error!(streams = state.len(), "Poll scheduler exited unexpectedly");
            return Ok(());
        }
    }

    let state = scheduler_handle.await?;
    info!(
        streams = state.len(),
        path = %state.path().display(),
        "Poller shutdown complete"
    );

    Ok(())
}

async fn build_store(remote: &RemoteConfig) -> Result<Arc<dyn LogStore>, RemoteError> {
    match remote.backend {
        RemoteBackend::Aws => {
            let store = AwsLogStore::new(remote).await?;
            info!(
                region = store.region().unwrap_or("<unset>"),
                endpoint = remote.endpoint.as_deref().unwrap_or("<default>"),
                "Using AWS SDK client"
            );
            Ok(Arc::new(store))
        }
        RemoteBackend::Http => {
            let store = HttpLogStore::new(remote)?;
            info!(endpoint = %store.endpoint(), "Using unsigned HTTP client");
            Ok(Arc::new(store))
        }
    }
}
