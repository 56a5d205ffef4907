use std::{sync::Arc, time::Duration};

use anyhow::Context;
use warden_process::ControlState;

mod backup;
mod catalogue;
mod config;
mod console;
mod error;
mod launch;
mod logging;
mod notify;
mod supervisor;
mod transfer;

const RECEIVER_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config::config_path();
    let mut cfg = config::Config::load(&path)?;
    let _log_guard = logging::init(&cfg.logging.dir).context("init logging")?;
    tracing::info!(config = %path.display(), version = env!("CARGO_PKG_VERSION"), "warden-agent starting");

    cfg.validate()?;
    if cfg.transfer.enabled {
        check_receiver(&cfg.transfer).await;
    } else {
        tracing::warn!("archive transfer disabled");
    }

    let control = Arc::new(ControlState::new());
    spawn_signal_listener(control.clone());

    let messages = Arc::new(catalogue::NotificationCatalogue::new(
        cfg.notifications.messages.clone(),
        cfg.notifications.users.clone(),
    ));
    let mut supervisor = supervisor::Supervisor::new(&cfg, control, messages)?;
    supervisor.run().await?;

    tracing::info!("warden-agent stopped");
    Ok(())
}

/// Startup reachability check only; an unreachable receiver does not stop the agent.
async fn check_receiver(transfer: &config::TransferConfig) {
    let addr = format!("{}:{}", transfer.host, transfer.port);
    match tokio::time::timeout(RECEIVER_PROBE_TIMEOUT, tokio::net::TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => tracing::info!(%addr, "backup receiver reachable"),
        Ok(Err(err)) => tracing::warn!(%addr, error = %err, "backup receiver unreachable"),
        Err(_) => tracing::warn!(%addr, "backup receiver did not answer in time"),
    }
}

fn spawn_signal_listener(control: Arc<ControlState>) {
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                tracing::info!("shutdown signal received");
                control.request_stop();
            }
            Err(err) => tracing::error!(error = %err, "failed to install signal handlers"),
        }
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
