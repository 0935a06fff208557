use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::{error, info};

use warden_supervisor::{ServiceSupervisor, StopReason, SupervisorConfig};

/// Warden service host - runs one executable as a supervised service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run duration in seconds (for testing)
    #[arg(long, value_name = "SECS")]
    run_duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug)?;

    info!("Starting warden host v{}", warden_supervisor::VERSION);
    info!("Config file: {}", args.config);

    let config = SupervisorConfig::load_from_file(&args.config)?;
    info!(
        "Loaded configuration for service {} ({})",
        config.service_name,
        config.executable.display()
    );

    let supervisor = ServiceSupervisor::new(config.service_name.clone());

    if let Err(e) = supervisor.start(config).await {
        error!("Failed to start service: {}", e);
        return Err(anyhow::anyhow!("Start failed: {}", e));
    }
    info!("Service started");

    let reason = match args.run_duration {
        Some(secs) => {
            info!("Running for {} seconds (test mode)", secs);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            StopReason::Requested("run duration elapsed".to_string())
        }
        None => shutdown_signal().await?,
    };

    info!("Shutting down ({})", reason);
    supervisor
        .stop(reason)
        .await
        .map_err(|e| anyhow::anyhow!("Shutdown failed: {}", e))?;

    let status = supervisor.current_state();
    info!(
        "Service stopped (last exit code: {:?}, restarts: {})",
        status.last_exit_code, status.restart_attempts
    );

    Ok(())
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}

/// Wait for the OS to ask us to stop.
async fn shutdown_signal() -> Result<StopReason> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        info!("Received {} signal", name);
        Ok(StopReason::Signal(name.to_string()))
    }

    #[cfg(windows)]
    {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received Ctrl+C signal");
        Ok(StopReason::Signal("ctrl-c".to_string()))
    }
}
