use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;

mod config;
mod upload;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::ReceiverConfig::from_env()?;
    std::fs::create_dir_all(&cfg.dir)
        .with_context(|| format!("create receive dir {}", cfg.dir.display()))?;

    let app = upload::router(upload::ReceiverState {
        token: Arc::from(cfg.token.as_str()),
        dir: cfg.dir.clone(),
        retention_days: cfg.retention_days,
    });

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    tracing::info!(%addr, dir = %cfg.dir.display(), "warden-receiver listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
