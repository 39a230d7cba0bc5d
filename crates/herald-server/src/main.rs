//! # Herald Server
//!
//! Main entry point: loads configuration, connects the job store, starts
//! the dispatcher, reaper and HTTP API, and shuts them down gracefully on
//! Ctrl+C or SIGTERM.

use herald_config::ConfigLoader;
use herald_core::telemetry::{init_telemetry, shutdown_telemetry};
use herald_core::HeraldResult;
use herald_server::publisher::build_publisher;
use herald_server::startup::{print_banner, print_startup_info};
use herald_server::{create_store, install_metrics_recorder, Application};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("herald: {}", e);
        shutdown_telemetry();
        std::process::exit(1);
    }
    shutdown_telemetry();
}

async fn run() -> HeraldResult<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    init_telemetry(&config.observability.tracing)?;
    print_banner();
    info!("Starting Herald v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let metrics = if config.observability.metrics_enabled {
        Some(install_metrics_recorder()?)
    } else {
        None
    };

    let store = create_store(&config.jobs.store).await?;
    let publisher = build_publisher(&config.publisher)?;

    let app = Application::build(&config, store, publisher, metrics).await?;
    print_startup_info(&config);

    app.run_until(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
