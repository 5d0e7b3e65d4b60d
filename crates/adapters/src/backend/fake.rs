// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake backend for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{Backend, BackendError, Phase, PhaseOutcome};
use async_trait::async_trait;
use nb_core::{ClusterHandle, ClusterStatus, JobId, LaunchedResources};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Provision { cluster: String, context: String },
    Restart { cluster: String },
    Stop { cluster: String },
    Teardown { cluster: String },
    StartDriver { cluster: String, job_id: JobId },
    RunPhase {
        cluster: String,
        job_id: JobId,
        phase: Phase,
        command: String,
    },
    FinishDriver { cluster: String, job_id: JobId },
    CancelJob { cluster: String, job_id: JobId },
}

struct FakeDriver {
    cancel: CancellationToken,
    lost: CancellationToken,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<BackendCall>,
    clusters: HashMap<String, ClusterStatus>,
    drivers: HashMap<(String, JobId), FakeDriver>,
    output: HashMap<(String, JobId), String>,
    exit_codes: HashMap<String, i32>,
    provision_failures: u32,
    provision_delay: Option<Duration>,
    unreachable: bool,
}

/// Fake backend for testing
///
/// Commands exit 0 unless an exit code was registered for them with
/// [`FakeBackend::set_exit_code`]. While jobs are held, run phases block
/// until [`FakeBackend::release_jobs`] (or cancellation, or driver loss).
#[derive(Clone)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
    hold: Arc<watch::Sender<bool>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            hold: Arc::new(hold),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: BackendCall) {
        self.lock().calls.push(call);
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn provision_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Provision { .. } | BackendCall::Restart { .. }))
            .count()
    }

    /// Number of setup phases run, across all clusters
    pub fn setup_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    BackendCall::RunPhase {
                        phase: Phase::Setup,
                        ..
                    }
                )
            })
            .count()
    }

    /// Fail the next `n` provision attempts
    pub fn fail_provisions(&self, n: u32) {
        self.lock().provision_failures = n;
    }

    /// Make provisioning take this long (observing cancellation)
    pub fn set_provision_delay(&self, delay: Duration) {
        self.lock().provision_delay = Some(delay);
    }

    /// Make status queries fail as if the backend could not be reached
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn set_exit_code(&self, command: &str, code: i32) {
        self.lock().exit_codes.insert(command.to_string(), code);
    }

    /// Block run phases until released
    pub fn hold_jobs(&self) {
        self.hold.send_replace(true);
    }

    pub fn release_jobs(&self) {
        self.hold.send_replace(false);
    }

    /// Stop a cluster behind the control plane's back
    pub fn interrupt(&self, cluster: &str) {
        let mut state = self.lock();
        if let Some(status) = state.clusters.get_mut(cluster) {
            *status = ClusterStatus::Stopped;
        }
        Self::lose_drivers(&mut state, cluster);
    }

    pub fn cluster(&self, cluster: &str) -> Option<ClusterStatus> {
        self.lock().clusters.get(cluster).copied()
    }

    pub fn has_driver(&self, cluster: &str, job_id: JobId) -> bool {
        self.lock()
            .drivers
            .contains_key(&(cluster.to_string(), job_id))
    }

    fn lose_drivers(state: &mut FakeState, cluster: &str) {
        state.drivers.retain(|(name, _), driver| {
            if name == cluster {
                driver.lost.cancel();
                false
            } else {
                true
            }
        });
    }

    fn handle_for(cluster: &str, context: &str) -> ClusterHandle {
        ClusterHandle {
            cluster_name: cluster.to_string(),
            context: context.to_string(),
            backend_id: format!("fake-{}", cluster),
        }
    }

    async fn delay(&self, cancel: &CancellationToken) -> Result<(), BackendError> {
        let delay = self.lock().provision_delay;
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        Ok(())
    }
}

async fn released(mut hold: watch::Receiver<bool>) {
    loop {
        if !*hold.borrow_and_update() {
            return;
        }
        if hold.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn provision(
        &self,
        cluster: &str,
        resources: &LaunchedResources,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError> {
        self.record(BackendCall::Provision {
            cluster: cluster.to_string(),
            context: resources.context.clone(),
        });
        self.delay(cancel).await?;

        let mut state = self.lock();
        if state.provision_failures > 0 {
            state.provision_failures -= 1;
            return Err(BackendError::ProvisionFailed(format!(
                "injected failure for {}",
                cluster
            )));
        }
        state
            .clusters
            .insert(cluster.to_string(), ClusterStatus::Up);
        Ok(Self::handle_for(cluster, &resources.context))
    }

    async fn restart(
        &self,
        handle: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError> {
        self.record(BackendCall::Restart {
            cluster: handle.cluster_name.clone(),
        });
        self.delay(cancel).await?;

        let mut state = self.lock();
        if state.provision_failures > 0 {
            state.provision_failures -= 1;
            return Err(BackendError::ProvisionFailed(format!(
                "injected failure for {}",
                handle.cluster_name
            )));
        }
        match state.clusters.get_mut(&handle.cluster_name) {
            Some(status) => *status = ClusterStatus::Up,
            None => return Err(BackendError::ClusterNotFound(handle.cluster_name.clone())),
        }
        Ok(handle.clone())
    }

    async fn stop(&self, handle: &ClusterHandle) -> Result<(), BackendError> {
        self.record(BackendCall::Stop {
            cluster: handle.cluster_name.clone(),
        });
        let mut state = self.lock();
        Self::lose_drivers(&mut state, &handle.cluster_name);
        match state.clusters.get_mut(&handle.cluster_name) {
            Some(status) => {
                *status = ClusterStatus::Stopped;
                Ok(())
            }
            None => Err(BackendError::ClusterNotFound(handle.cluster_name.clone())),
        }
    }

    async fn teardown(&self, handle: &ClusterHandle) -> Result<(), BackendError> {
        self.record(BackendCall::Teardown {
            cluster: handle.cluster_name.clone(),
        });
        let mut state = self.lock();
        Self::lose_drivers(&mut state, &handle.cluster_name);
        state.clusters.remove(&handle.cluster_name);
        Ok(())
    }

    async fn cluster_status(
        &self,
        handle: &ClusterHandle,
    ) -> Result<Option<ClusterStatus>, BackendError> {
        let state = self.lock();
        if state.unreachable {
            return Err(BackendError::CommandFailed("backend unreachable".to_string()));
        }
        Ok(state.clusters.get(&handle.cluster_name).copied())
    }

    async fn start_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        self.record(BackendCall::StartDriver {
            cluster: handle.cluster_name.clone(),
            job_id,
        });
        let mut state = self.lock();
        if state.clusters.get(&handle.cluster_name) != Some(&ClusterStatus::Up) {
            return Err(BackendError::ClusterNotUp(handle.cluster_name.clone()));
        }
        state.drivers.insert(
            (handle.cluster_name.clone(), job_id),
            FakeDriver {
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
        _envs: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutcome, BackendError> {
        self.record(BackendCall::RunPhase {
            cluster: handle.cluster_name.clone(),
            job_id,
            phase,
            command: command.to_string(),
        });
        let key = (handle.cluster_name.clone(), job_id);
        let (job_cancel, lost, code) = {
            let mut state = self.lock();
            let Some(driver) = state.drivers.get(&key) else {
                return Err(BackendError::DriverNotFound {
                    cluster: handle.cluster_name.clone(),
                    job_id,
                });
            };
            let tokens = (driver.cancel.clone(), driver.lost.clone());
            let code = state.exit_codes.get(command).copied().unwrap_or(0);
            state
                .output
                .entry(key.clone())
                .or_default()
                .push_str(&format!("{}: {}\n", phase, command));
            (tokens.0, tokens.1, code)
        };

        tokio::select! {
            _ = released(self.hold.subscribe()) => Ok(PhaseOutcome::Exited(code)),
            _ = cancel.cancelled() => Ok(PhaseOutcome::Cancelled),
            _ = job_cancel.cancelled() => Ok(PhaseOutcome::Cancelled),
            _ = lost.cancelled() => Ok(PhaseOutcome::DriverLost),
        }
    }

    async fn finish_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        self.record(BackendCall::FinishDriver {
            cluster: handle.cluster_name.clone(),
            job_id,
        });
        self.lock()
            .drivers
            .remove(&(handle.cluster_name.clone(), job_id));
        Ok(())
    }

    async fn cancel_job(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        self.record(BackendCall::CancelJob {
            cluster: handle.cluster_name.clone(),
            job_id,
        });
        if let Some(driver) = self
            .lock()
            .drivers
            .get(&(handle.cluster_name.clone(), job_id))
        {
            driver.cancel.cancel();
        }
        Ok(())
    }

    async fn driver_alive(&self, handle: &ClusterHandle, job_id: JobId) -> Result<bool, BackendError> {
        let state = self.lock();
        if state.unreachable {
            return Err(BackendError::CommandFailed("backend unreachable".to_string()));
        }
        Ok(state
            .drivers
            .contains_key(&(handle.cluster_name.clone(), job_id)))
    }

    async fn job_output(&self, handle: &ClusterHandle, job_id: JobId) -> Result<String, BackendError> {
        Ok(self
            .lock()
            .output
            .get(&(handle.cluster_name.clone(), job_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
