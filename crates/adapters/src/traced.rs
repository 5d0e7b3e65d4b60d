// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrappers for consistent observability

use crate::backend::{Backend, BackendError, Phase, PhaseOutcome};
use async_trait::async_trait;
use nb_core::{ClusterHandle, ClusterStatus, JobId, LaunchedResources};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Wrapper that adds tracing to any Backend
#[derive(Clone)]
pub struct TracedBackend<B> {
    inner: B,
}

impl<B> TracedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<B: Backend> Backend for TracedBackend<B> {
    async fn provision(
        &self,
        cluster: &str,
        resources: &LaunchedResources,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError> {
        let span = tracing::info_span!("backend.provision", cluster, context = %resources.context);
        async {
            tracing::info!(resources = %resources, "starting");

            // Precondition: cluster names end up in paths and process env
            if cluster.is_empty() || cluster.contains('/') {
                tracing::error!("invalid cluster name");
                return Err(BackendError::ProvisionFailed(format!(
                    "invalid cluster name: {:?}",
                    cluster
                )));
            }

            let start = std::time::Instant::now();
            let result = self.inner.provision(cluster, resources, cancel).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(handle) => tracing::info!(
                    backend_id = %handle.backend_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "cluster provisioned"
                ),
                Err(e) => tracing::error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "provision failed"
                ),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn restart(
        &self,
        handle: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError> {
        let span = tracing::info_span!("backend.restart", cluster = %handle.cluster_name);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.restart(handle, cancel).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(_) => tracing::info!(elapsed_ms, "cluster restarted"),
                Err(e) => tracing::error!(elapsed_ms, error = %e, "restart failed"),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn stop(&self, handle: &ClusterHandle) -> Result<(), BackendError> {
        let span = tracing::info_span!("backend.stop", cluster = %handle.cluster_name);
        async {
            let result = self.inner.stop(handle).await;
            match &result {
                Ok(()) => tracing::info!("stopped"),
                Err(e) => tracing::error!(error = %e, "stop failed"),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn teardown(&self, handle: &ClusterHandle) -> Result<(), BackendError> {
        let span = tracing::info_span!("backend.teardown", cluster = %handle.cluster_name);
        async {
            let result = self.inner.teardown(handle).await;
            match &result {
                Ok(()) => tracing::info!("torn down"),
                Err(e) => tracing::error!(error = %e, "teardown failed"),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn cluster_status(
        &self,
        handle: &ClusterHandle,
    ) -> Result<Option<ClusterStatus>, BackendError> {
        let result = self.inner.cluster_status(handle).await;
        tracing::trace!(cluster = %handle.cluster_name, status = ?result.as_ref().ok(), "checked");
        result
    }

    async fn start_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        let span = tracing::info_span!("backend.driver", cluster = %handle.cluster_name, %job_id);
        async {
            let result = self.inner.start_driver(handle, job_id).await;
            match &result {
                Ok(()) => tracing::debug!("driver registered"),
                Err(e) => tracing::error!(error = %e, "driver registration failed"),
            }

            result
        }
        .instrument(span)
        .await
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
        let span = tracing::info_span!("backend.run", cluster = %handle.cluster_name, %job_id, %phase);
        async {
            tracing::info!(command_len = command.len(), env_count = envs.len(), "starting");

            let start = std::time::Instant::now();
            let result = self
                .inner
                .run_phase(handle, job_id, phase, command, envs, cancel)
                .await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(outcome) => tracing::info!(elapsed_ms, ?outcome, "phase finished"),
                Err(e) => tracing::error!(elapsed_ms, error = %e, "phase failed"),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn finish_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        let result = self.inner.finish_driver(handle, job_id).await;
        tracing::debug!(cluster = %handle.cluster_name, %job_id, ok = result.is_ok(), "driver released");
        result
    }

    async fn cancel_job(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        let span = tracing::info_span!("backend.cancel", cluster = %handle.cluster_name, %job_id);
        async {
            let result = self.inner.cancel_job(handle, job_id).await;
            // Cancelling a job that already exited is not a problem
            match &result {
                Ok(()) => tracing::info!("cancel sent"),
                Err(e) => tracing::warn!(error = %e, "cancel failed (may be expected)"),
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn driver_alive(&self, handle: &ClusterHandle, job_id: JobId) -> Result<bool, BackendError> {
        let result = self.inner.driver_alive(handle, job_id).await;
        tracing::trace!(cluster = %handle.cluster_name, %job_id, alive = ?result.as_ref().ok(), "checked");
        result
    }

    async fn job_output(&self, handle: &ClusterHandle, job_id: JobId) -> Result<String, BackendError> {
        self.inner.job_output(handle, job_id).await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
