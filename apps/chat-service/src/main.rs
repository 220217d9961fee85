use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chat_persistence_service::config::Config;
use chat_persistence_service::{build_router, init_tracing};
use chat_store::ChatStore;
use clap::Parser;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "chat-persistence-service")]
#[command(about = "Multi-tenant chat thread and message persistence service")]
struct Args {
    /// Overrides CHAT_STORE_BIND_ADDR.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,
    /// Overrides CHAT_STORE_PATH.
    #[arg(long)]
    store_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env().context("load configuration")?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(store_path) = args.store_path {
        config.store_path = Some(store_path);
    }

    init_tracing(&config);

    let store = ChatStore::open_path(config.store_path.clone(), config.flush_debounce).await;
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    tracing::info!(
        target: "chat_service",
        addr = %listener.local_addr().context("read local address")?,
        persistent = config.store_path.is_some(),
        flush_debounce_ms = config.flush_debounce.as_millis(),
        "chat persistence service listening",
    );

    axum::serve(listener, build_router(store.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve http")?;

    store.flush_now().await;
    let stats = store.scheduler_stats();
    tracing::info!(
        target: "chat_service",
        flushes = stats.flushes,
        failed_flushes = stats.failures,
        "chat persistence service stopped",
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            target: "chat_service",
            error = %error,
            "failed to listen for ctrl-c; serving until killed",
        );
        std::future::pending::<()>().await;
    }
    tracing::info!(target: "chat_service", "shutdown requested");
}
