// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use fs2::FileExt;
use nb_adapters::{LocalBackend, RetryBackend, StaticContextProbe, TracedBackend};
use nb_core::{Clock, SystemClock, UuidIdGen};
use nb_daemon::{DaemonPaths, NoStateDir, Settings, SettingsError};
use nb_engine::{EngineError, Runtime, RuntimeDeps};
use nb_storage::{Store, WalError};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::server::ServerContext;

/// Backend stack used by the daemon: retries outside, tracing per attempt
pub type DaemonBackend = RetryBackend<TracedBackend<LocalBackend>>;

/// Daemon runtime with concrete adapter types
pub type DaemonRuntime = Runtime<DaemonBackend, StaticContextProbe, SystemClock, UuidIdGen>;

/// Daemon state during operation
pub struct DaemonState {
    pub paths: DaemonPaths,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub listener: UnixListener,
    pub runtime: DaemonRuntime,
    pub start_time: Instant,
    /// Cancelled on SIGTERM/SIGINT or an IPC shutdown request
    pub shutdown: CancellationToken,
    reconciler: Option<JoinHandle<()>>,
}

impl DaemonState {
    /// Context handed to each connection task
    pub fn server_context(
        &self,
    ) -> ServerContext<DaemonBackend, StaticContextProbe, SystemClock, UuidIdGen> {
        ServerContext::new(self.runtime.clone(), self.start_time, self.shutdown.clone())
    }

    /// Shutdown the daemon gracefully
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");

        // 1. Stop background reconciliation
        self.shutdown.cancel();
        if let Some(reconciler) = self.reconciler.take() {
            if let Err(e) = reconciler.await {
                warn!("Reconciler task ended abnormally: {}", e);
            }
        }

        // 2. Remove socket file
        if self.paths.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.socket_path) {
                warn!("Failed to remove socket file: {}", e);
            }
        }

        // 3. Remove PID file
        if self.paths.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }

        // 4. Remove version file
        if self.paths.version_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.version_path) {
                warn!("Failed to remove version file: {}", e);
            }
        }

        // Lock is released when self.lock_file is dropped
        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    NoStateDir(#[from] NoStateDir),

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Recovery failed: {0}")]
    Recovery(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub async fn startup(paths: &DaemonPaths) -> Result<DaemonState, LifecycleError> {
    match startup_inner(paths).await {
        Ok(state) => Ok(state),
        // Files belong to the daemon that holds the lock
        Err(e @ LifecycleError::LockFailed(_)) => Err(e),
        Err(e) => {
            cleanup_on_failure(paths);
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(paths: &DaemonPaths) -> Result<DaemonState, LifecycleError> {
    // 1. Create state and socket directories
    std::fs::create_dir_all(&paths.state_dir)?;
    if let Some(parent) = paths.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // 2. Acquire lock file FIRST - prevents races. Not truncated until
    // locked so a running daemon's PID survives a failed second start.
    let mut lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&paths.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    // 3. Create data directories
    if let Some(parent) = paths.wal_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&paths.clusters_path)?;
    std::fs::create_dir_all(&paths.logs_path)?;

    std::fs::write(&paths.version_path, env!("CARGO_PKG_VERSION"))?;

    // 4. Load settings BEFORE binding socket (fail fast on a bad config)
    let settings = Settings::load(&paths.config_path)?;

    // 5. Replay the WAL, forget old finished requests, and rewrite it as
    // a snapshot
    let store = Store::open(&paths.wal_path)?;
    let retention_ms = u64::try_from(settings.requests.retention.as_millis()).unwrap_or(u64::MAX);
    let pruned = store.prune_requests(SystemClock.epoch_ms().saturating_sub(retention_ms));
    if pruned > 0 {
        info!(pruned, "dropped expired requests");
    }
    store.compact()?;
    let (clusters, jobs, requests) = store.read(|s| {
        (
            s.clusters.len(),
            s.jobs.values().map(|jobs| jobs.len()).sum::<usize>(),
            s.requests.len(),
        )
    });
    info!(clusters, jobs, requests, "Loaded state");

    // 6. Set up adapters
    let backend = RetryBackend::new(
        TracedBackend::new(LocalBackend::new(&paths.clusters_path)),
        settings.provision.max_attempts,
    )
    .with_initial_delay(settings.provision.retry_delay);
    let probe = StaticContextProbe::new(settings.contexts.clone());

    let runtime = Runtime::new(
        RuntimeDeps {
            backend,
            probe,
            store,
        },
        SystemClock,
        UuidIdGen,
        settings.runtime_config(paths.logs_path.clone()),
    );

    // 7. Restore ledger and timers, settle interrupted requests, and check
    // drivers once before serving
    runtime.recover()?;
    let report = runtime.reconcile_once().await;
    if !report.failed_driver.is_empty() {
        warn!(
            jobs = report.failed_driver.len(),
            "Jobs lost their driver while the daemon was down"
        );
    }

    // 8. Remove stale socket and bind (LAST - only after all validation passes)
    if paths.socket_path.exists() {
        std::fs::remove_file(&paths.socket_path)?;
    }
    let listener = UnixListener::bind(&paths.socket_path)
        .map_err(|e| LifecycleError::BindFailed(paths.socket_path.clone(), e))?;

    let shutdown = CancellationToken::new();
    let reconciler = runtime.spawn_reconciler(shutdown.child_token());

    info!(
        contexts = ?settings.failover.allowed_contexts,
        "Daemon started in {}",
        paths.state_dir.display()
    );

    Ok(DaemonState {
        paths: paths.clone(),
        lock_file,
        listener,
        runtime,
        start_time: Instant::now(),
        shutdown,
        reconciler: Some(reconciler),
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(paths: &DaemonPaths) {
    if paths.socket_path.exists() {
        let _ = std::fs::remove_file(&paths.socket_path);
    }
    if paths.version_path.exists() {
        let _ = std::fs::remove_file(&paths.version_path);
    }
    if paths.lock_path.exists() {
        let _ = std::fs::remove_file(&paths.lock_path);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
