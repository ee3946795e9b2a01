// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! relayd: the companion daemon binary.
//!
//! Sets up logging, bootstraps every component, then runs until a signal
//! requests shutdown. The accept loops and background tasks all live on
//! [`relay_daemon::bootstrap::Daemon`]; this file only owns process-level
//! concerns (logging setup, signal handling, exit code).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use relay_daemon::bootstrap;
use relay_daemon::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let state_dir = env::state_dir().map_err(|e| Box::<dyn std::error::Error>::from(e.to_string()))?;
    let _log_guard = setup_logging(&state_dir)?;

    info!(version = env::PROTOCOL_VERSION, "starting relayd");

    let daemon = match bootstrap::bootstrap().await {
        Ok(daemon) => Arc::new(daemon),
        Err(e) => {
            error!(error = %e, "failed to bootstrap daemon");
            return Err(e.into());
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let run_handle = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }
    daemon.request_shutdown();
    let _ = run_handle.await;

    info!("relayd stopped");
    Ok(())
}

fn setup_logging(
    state_dir: &std::path::Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let logs_dir = state_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(&logs_dir, "relayd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(guard)
}
