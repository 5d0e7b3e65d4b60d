// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Nimbus daemon (nbd)
//!
//! Background process that owns the cluster store and serves the `nb` CLI.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod lifecycle;
mod server;

use std::time::Duration;

use nb_daemon::{DaemonPaths, STARTUP_MARKER_PREFIX};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn, Instrument};

use crate::lifecycle::LifecycleError;

/// How often due autostop timers are checked
const TIMER_TICK: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let paths = DaemonPaths::from_env()?;

    // Write startup marker to log (before tracing setup, so CLI can find it)
    write_startup_marker(&paths)?;

    let log_guard = setup_logging(&paths)?;

    info!(state_dir = %paths.state_dir.display(), version = env!("CARGO_PKG_VERSION"), "starting nbd");

    let mut daemon = match lifecycle::startup(&paths).await {
        Ok(d) => d,
        Err(e) => {
            write_startup_error(&paths, &e);
            error!("Failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(socket = %paths.socket_path.display(), "daemon ready");
    println!("READY");

    let ctx = daemon.server_context();
    let shutdown = daemon.shutdown.clone();
    let mut connections: u64 = 0;

    let mut timers = tokio::time::interval(TIMER_TICK);
    timers.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            accepted = daemon.listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections += 1;
                    let ctx = ctx.clone();
                    let span = tracing::debug_span!("connection", id = connections);
                    tokio::spawn(
                        async move {
                            if let Err(e) = ctx.handle_connection(stream).await {
                                warn!(error = %e, "connection failed");
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => error!(error = %e, "accept failed"),
            },

            _ = timers.tick() => {
                let fired = daemon.runtime.tick_timers().await;
                if fired > 0 {
                    info!(fired, "autostop timers fired");
                }
            }

            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }

            _ = sigint.recv() => {
                info!("SIGINT received, shutting down");
                break;
            }

            _ = shutdown.cancelled() => {
                info!("shutdown requested by client");
                break;
            }
        }
    }

    daemon.shutdown().await?;
    info!("daemon stopped");
    Ok(())
}

/// Append the marker the CLI searches for when a start fails
fn write_startup_marker(paths: &DaemonPaths) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = paths.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_path)?;
    writeln!(file, "{}{}) ---", STARTUP_MARKER_PREFIX, std::process::id())?;

    Ok(())
}

/// Record a startup failure directly in the log; the non-blocking writer
/// may not flush before the process exits
fn write_startup_error(paths: &DaemonPaths, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR Failed to start daemon: {}", error);
}

fn setup_logging(
    paths: &DaemonPaths,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let dir = paths.log_path.parent().ok_or(nb_daemon::NoStateDir)?;
    let file_name = paths.log_path.file_name().ok_or(nb_daemon::NoStateDir)?;
    std::fs::create_dir_all(dir)?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}
