use clap::Parser;
use collector::config::{CliArgs, CollectorConfig};
use collector::poller::Poller;
use log::{error, info};
use tokio_util::sync::CancellationToken;

/// Main-method of the collector.
/// Parses configuration, opens the database and the rcon socket, then polls
/// until SIGINT or SIGTERM. Database errors end the process with a failure.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CollectorConfig::from_args(CliArgs::parse())?;

    info!("Starting collector for {}", config.server_address());
    info!("Database: {}", config.db_path.display());

    // handlers are in place before startup, so an early SIGTERM is a clean stop
    let shutdown = CancellationToken::new();
    if let Err(e) = listen_for_shutdown(shutdown.clone()) {
        error!("Failed to listen for shutdown signals: {}", e);
    }

    let poller = Poller::new(&config).await.map_err(|e| {
        error!("Startup failed: {}", e);
        e
    })?;

    let stats = poller.run(shutdown).await.map_err(|e| {
        error!("Collector failed: {}", e);
        e
    })?;

    info!("Collector stopped after {} polls", stats.cycles);
    Ok(())
}

/// Installs the SIGINT and SIGTERM handlers (Ctrl+C elsewhere) and cancels
/// `shutdown` once one of them fires.
fn listen_for_shutdown(shutdown: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            info!("Received shutdown signal, stopping...");
            shutdown.cancel();
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal, stopping...");
                    shutdown.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }
    Ok(())
}
