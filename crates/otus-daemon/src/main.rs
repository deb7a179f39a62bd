//! otus daemon entry point: config, PID-file lifecycle, the process-wide
//! VM pool, and the Unix-socket HTTP/SSE API.

mod error;
mod server;
mod shutdown;
mod state;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use otus_config::DaemonConfig;
use tokio::net::UnixListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = DaemonConfig::load().context("loading daemon configuration")?;
    acquire_pid_file(&config)?;

    let result = run(config).await;
    if let Err(e) = &result {
        warn!(error = %e, "daemon exiting after fatal error");
    }
    result
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Refuse to start if a live daemon already holds the PID file; otherwise
/// write our own PID.
fn acquire_pid_file(config: &DaemonConfig) -> Result<()> {
    if let Some(parent) = config.pid_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    if let Ok(existing) = std::fs::read_to_string(&config.pid_path) {
        if let Ok(pid) = existing.trim().parse::<u32>() {
            if std::path::Path::new(&format!("/proc/{pid}")).exists() {
                bail!("daemon already running with pid {pid} ({})", config.pid_path.display());
            }
            warn!(pid, "stale pid file found, removing");
        }
    }

    std::fs::write(&config.pid_path, std::process::id().to_string())
        .with_context(|| format!("writing {}", config.pid_path.display()))?;
    Ok(())
}

async fn run(config: DaemonConfig) -> Result<()> {
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)
            .with_context(|| format!("removing stale socket {}", config.socket_path.display()))?;
    }

    let state = Arc::new(AppState::new(config));
    state.spawn_pool_warmup();

    let listener = UnixListener::bind(&state.config.socket_path)
        .with_context(|| format!("binding {}", state.config.socket_path.display()))?;
    info!(socket = %state.config.socket_path.display(), "otus daemon listening");

    let app = server::create_router(Arc::clone(&state));
    let serve_state = Arc::clone(&state);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, shutting down");
        shutdown::drain(&serve_state).await;
    });

    if let Err(e) = server.await {
        warn!(error = %e, "server loop exited with error");
    }

    shutdown::remove_runtime_files(&state.config.socket_path, &state.config.pid_path);
    Ok(())
}
