//! Hub Bridge Transfer Tracker
//!
//! Follows cross-chain transfers through deposit, relay event and release,
//! and serves their summaries over HTTP.

use std::sync::Arc;

use tracing::{error, info};

use tracker::config::Config;
use tracker::server;
use tracker::service::TrackerService;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting Hub Bridge Transfer Tracker");

    let config = Config::load()?;
    info!(
        tracker_id = %config.tracker_id,
        hub = %config.hub_network,
        gateways = config.gateways.len(),
        tracked = config.track_transfers.len(),
        "Configuration loaded"
    );

    let service = Arc::new(TrackerService::new(&config)?);

    let server_service = service.clone();
    let bind_address = config.bind_address.clone();
    let port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = server::start_server(&bind_address, port, server_service).await {
            error!(error = %e, "Status server failed");
        }
    });

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    service.run(shutdown_rx).await?;

    info!("Transfer tracker stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,transfer_tracker=debug,tracker=debug,transfer_pipeline=debug")
    });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
