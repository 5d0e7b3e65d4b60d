// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local backend: clusters are directories, jobs are `sh -c` processes
//!
//! Layout under the root:
//!
//! ```text
//! <cluster>/status          UP | STOPPED
//! <cluster>/workdir/        working directory for every command
//! <cluster>/jobs/<id>.log   combined setup and run output
//! ```
//!
//! Rewriting `status` by hand simulates an out-of-band stop: running
//! commands notice within [`STATUS_POLL`] and report a lost driver.
//!
//! Each command leads its own process group. Cancelling or losing the
//! driver kills the whole group, so anything the command forked goes too.

use super::{Backend, BackendError, Phase, PhaseOutcome};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use nb_core::{ClusterHandle, ClusterStatus, JobId, LaunchedResources};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// How often a running command re-checks its cluster's status
pub const STATUS_POLL: Duration = Duration::from_millis(500);

struct Driver {
    cancel: CancellationToken,
    lost: CancellationToken,
}

#[derive(Clone)]
pub struct LocalBackend {
    root: PathBuf,
    drivers: Arc<Mutex<HashMap<(String, JobId), Driver>>>,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            drivers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cluster_dir(&self, cluster: &str) -> PathBuf {
        self.root.join(cluster)
    }

    pub fn job_log_path(&self, cluster: &str, job_id: JobId) -> PathBuf {
        self.cluster_dir(cluster)
            .join("jobs")
            .join(format!("{}.log", job_id))
    }

    fn status_path(&self, cluster: &str) -> PathBuf {
        self.cluster_dir(cluster).join("status")
    }

    async fn read_status(&self, cluster: &str) -> Result<Option<ClusterStatus>, BackendError> {
        match tokio::fs::read_to_string(self.status_path(cluster)).await {
            Ok(s) => Ok(Some(match s.trim() {
                "UP" => ClusterStatus::Up,
                "STOPPED" => ClusterStatus::Stopped,
                _ => ClusterStatus::Init,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_status(&self, cluster: &str, status: ClusterStatus) -> Result<(), BackendError> {
        tokio::fs::write(self.status_path(cluster), status.as_str()).await?;
        Ok(())
    }

    async fn is_up(&self, cluster: &str) -> bool {
        matches!(self.read_status(cluster).await, Ok(Some(ClusterStatus::Up)))
    }

    /// Signal every driver on the cluster that it is gone
    fn lose_drivers(&self, cluster: &str) {
        let mut drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        drivers.retain(|(name, _), driver| {
            if name == cluster {
                driver.lost.cancel();
                false
            } else {
                true
            }
        });
    }

    fn driver_tokens(
        &self,
        cluster: &str,
        job_id: JobId,
    ) -> Option<(CancellationToken, CancellationToken)> {
        let drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        drivers
            .get(&(cluster.to_string(), job_id))
            .map(|d| (d.cancel.clone(), d.lost.clone()))
    }
}

/// A command's process group, killed at most once and at the latest on drop
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()).map(Pid::from_raw),
        }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = pgid.as_raw(), error = %e, "failed to kill process group"),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn append_line(path: &Path, line: &str) -> Result<(), BackendError> {
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    Ok(())
}

#[async_trait]
impl Backend for LocalBackend {
    async fn provision(
        &self,
        cluster: &str,
        resources: &LaunchedResources,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let dir = self.cluster_dir(cluster);
        tokio::fs::create_dir_all(dir.join("workdir")).await?;
        tokio::fs::create_dir_all(dir.join("jobs")).await?;
        self.write_status(cluster, ClusterStatus::Up).await?;

        Ok(ClusterHandle {
            cluster_name: cluster.to_string(),
            context: resources.context.clone(),
            backend_id: format!("local-{}", cluster),
        })
    }

    async fn restart(
        &self,
        handle: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        if self.read_status(&handle.cluster_name).await?.is_none() {
            return Err(BackendError::ClusterNotFound(handle.cluster_name.clone()));
        }
        self.write_status(&handle.cluster_name, ClusterStatus::Up).await?;
        Ok(handle.clone())
    }

    async fn stop(&self, handle: &ClusterHandle) -> Result<(), BackendError> {
        self.lose_drivers(&handle.cluster_name);
        if self.read_status(&handle.cluster_name).await?.is_none() {
            return Err(BackendError::ClusterNotFound(handle.cluster_name.clone()));
        }
        self.write_status(&handle.cluster_name, ClusterStatus::Stopped)
            .await
    }

    async fn teardown(&self, handle: &ClusterHandle) -> Result<(), BackendError> {
        self.lose_drivers(&handle.cluster_name);
        match tokio::fs::remove_dir_all(self.cluster_dir(&handle.cluster_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn cluster_status(
        &self,
        handle: &ClusterHandle,
    ) -> Result<Option<ClusterStatus>, BackendError> {
        self.read_status(&handle.cluster_name).await
    }

    async fn start_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        if !self.is_up(&handle.cluster_name).await {
            return Err(BackendError::ClusterNotUp(handle.cluster_name.clone()));
        }
        tokio::fs::create_dir_all(self.cluster_dir(&handle.cluster_name).join("jobs")).await?;
        let mut drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        drivers.insert(
            (handle.cluster_name.clone(), job_id),
            Driver {
                cancel: CancellationToken::new(),
                lost: CancellationToken::new(),
            },
        );
        Ok(())
    }

    async fn run_phase(
        &self,
        handle: &ClusterHandle,
        job_id: JobId,
        phase: Phase,
        command: &str,
        envs: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutcome, BackendError> {
        let cluster = &handle.cluster_name;
        let Some((job_cancel, lost)) = self.driver_tokens(cluster, job_id) else {
            return Err(BackendError::DriverNotFound {
                cluster: cluster.clone(),
                job_id,
            });
        };
        if !self.is_up(cluster).await {
            return Ok(PhaseOutcome::DriverLost);
        }

        let log_path = self.job_log_path(cluster, job_id);
        let banner = match phase {
            Phase::Setup => format!("Running setup on cluster {}", cluster),
            Phase::Run => format!("Running task on cluster {}", cluster),
        };
        append_line(&log_path, &banner).await?;

        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.cluster_dir(cluster).join("workdir"))
            .envs(envs)
            .env("NB_CLUSTER", cluster)
            .env("NB_JOB_ID", job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::CommandFailed(e.to_string()))?;
        let mut group = ProcessGroup::new(child.id());

        tracing::debug!(cluster, %job_id, %phase, pid = ?child.id(), "command started");

        let mut ticker = tokio::time::interval(STATUS_POLL);
        loop {
            let outcome = tokio::select! {
                status = child.wait() => {
                    let code = status?.code().unwrap_or(-1);
                    // Background children of a finished command go with it
                    group.kill();
                    return Ok(PhaseOutcome::Exited(code));
                }
                _ = cancel.cancelled() => PhaseOutcome::Cancelled,
                _ = job_cancel.cancelled() => PhaseOutcome::Cancelled,
                _ = lost.cancelled() => PhaseOutcome::DriverLost,
                _ = ticker.tick() => {
                    if self.is_up(cluster).await {
                        continue;
                    }
                    PhaseOutcome::DriverLost
                }
            };

            group.kill();
            if let Err(e) = child.wait().await {
                tracing::warn!(cluster, %job_id, error = %e, "failed to reap command");
            }
            let note = match outcome {
                PhaseOutcome::Cancelled => "Job cancelled",
                _ => "Driver lost",
            };
            append_line(&log_path, note).await?;
            return Ok(outcome);
        }
    }

    async fn finish_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        let mut drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        drivers.remove(&(handle.cluster_name.clone(), job_id));
        Ok(())
    }

    async fn cancel_job(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        if let Some((cancel, _)) = self.driver_tokens(&handle.cluster_name, job_id) {
            cancel.cancel();
        }
        Ok(())
    }

    async fn driver_alive(&self, handle: &ClusterHandle, job_id: JobId) -> Result<bool, BackendError> {
        if self.driver_tokens(&handle.cluster_name, job_id).is_none() {
            return Ok(false);
        }
        Ok(self.is_up(&handle.cluster_name).await)
    }

    async fn job_output(&self, handle: &ClusterHandle, job_id: JobId) -> Result<String, BackendError> {
        match tokio::fs::read_to_string(self.job_log_path(&handle.cluster_name, job_id)).await {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
