//! vitals Binary Entry Point
//!
//! This binary runs the complete vitals collection service. Core
//! functionality is provided by the `vitals` library crate.

use clap::Parser;
use vitals::{
    config::AppConfig,
    credential::CredentialStore,
    dispatch::{Dispatcher, FileExporter, LogNotifier},
    refresher::TokenRefresher,
    scheduler::Scheduler,
    Pipeline,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// vitals - Unattended Health-Data Collection Service
#[derive(Parser, Debug)]
#[command(name = "vitals", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "VITALS_CONFIG"
    )]
    config: String,

    /// Credential file path (overrides config file)
    #[arg(long, env = "VITALS_CREDENTIAL_PATH")]
    credential_path: Option<std::path::PathBuf>,

    /// Snapshot export directory (overrides config file)
    #[arg(long, env = "VITALS_EXPORT_DIR")]
    export_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vitals=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("vitals - Unattended Health-Data Collection Service");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(path) = cli.credential_path {
        config.credential.path = path;
    }
    if let Some(dir) = cli.export_dir {
        config.export.dir = dir;
    }

    tracing::info!(
        "API: {}, credential: {}, refresh every {:?}, collect every {:?}",
        config.api.base_url,
        config.credential.path.display(),
        config.schedule.refresh_interval,
        config.schedule.collect_interval,
    );

    // Spawn the credential store owner task
    let (store, store_task) = CredentialStore::spawn(&config.credential.path);

    // Wire the components; the config object is the only shared state
    let refresher = TokenRefresher::new(&config.api, config.backoff.clone())?;
    let pipeline = Pipeline::new(&config.api, config.backoff.clone())?;
    let dispatcher = Dispatcher::new(
        Box::new(FileExporter::new(&config.export.dir)),
        Box::new(LogNotifier::new(config.notification.class)),
    );
    let scheduler = Scheduler::new(
        store.clone(),
        refresher,
        pipeline,
        dispatcher,
        config.schedule.clone(),
    );

    tracing::info!("Press Ctrl+C to shutdown");
    let result = scheduler.run(shutdown_signal()).await;

    // Stop the store after the activities are done with it
    if let Err(e) = store.shutdown().await {
        tracing::warn!(error = %e, "credential store shutdown failed");
    }
    let _ = store_task.await;

    match result {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Exiting after fatal error");
            Err(e.into())
        }
    }
}

/// Resolve when a termination signal arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
