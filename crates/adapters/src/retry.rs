// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded retries for provisioning

use crate::backend::{Backend, BackendError, Phase, PhaseOutcome};
use async_trait::async_trait;
use nb_core::{ClusterHandle, ClusterStatus, JobId, LaunchedResources};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Wrapper that retries `provision` and `restart` a bounded number of times
///
/// Only [`BackendError::ProvisionFailed`] is retried. The delay doubles after
/// every failed attempt and is cut short by cancellation.
#[derive(Clone)]
pub struct RetryBackend<B> {
    inner: B,
    max_attempts: u32,
    initial_delay: Duration,
}

impl<B> RetryBackend<B> {
    pub fn new(inner: B, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_secs(1),
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    async fn with_retries<T, F, Fut>(
        &self,
        cluster: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, BackendError>> + Send,
        T: Send,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Err(BackendError::ProvisionFailed(reason)) if attempt < self.max_attempts => {
                    tracing::warn!(
                        cluster,
                        attempt,
                        max_attempts = self.max_attempts,
                        reason,
                        "provision attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                    }
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(BackendError::ProvisionFailed(reason)) => {
                    return Err(BackendError::ProvisionFailed(format!(
                        "{} (after {} attempts)",
                        reason, attempt
                    )));
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<B: Backend> Backend for RetryBackend<B> {
    async fn provision(
        &self,
        cluster: &str,
        resources: &LaunchedResources,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError> {
        self.with_retries(cluster, cancel, || {
            self.inner.provision(cluster, resources, cancel)
        })
        .await
    }

    async fn restart(
        &self,
        handle: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError> {
        self.with_retries(&handle.cluster_name, cancel, || {
            self.inner.restart(handle, cancel)
        })
        .await
    }

    async fn stop(&self, handle: &ClusterHandle) -> Result<(), BackendError> {
        self.inner.stop(handle).await
    }

    async fn teardown(&self, handle: &ClusterHandle) -> Result<(), BackendError> {
        self.inner.teardown(handle).await
    }

    async fn cluster_status(
        &self,
        handle: &ClusterHandle,
    ) -> Result<Option<ClusterStatus>, BackendError> {
        self.inner.cluster_status(handle).await
    }

    async fn start_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        self.inner.start_driver(handle, job_id).await
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
        self.inner
            .run_phase(handle, job_id, phase, command, envs, cancel)
            .await
    }

    async fn finish_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        self.inner.finish_driver(handle, job_id).await
    }

    async fn cancel_job(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError> {
        self.inner.cancel_job(handle, job_id).await
    }

    async fn driver_alive(&self, handle: &ClusterHandle, job_id: JobId) -> Result<bool, BackendError> {
        self.inner.driver_alive(handle, job_id).await
    }

    async fn job_output(&self, handle: &ClusterHandle, job_id: JobId) -> Result<String, BackendError> {
        self.inner.job_output(handle, job_id).await
    }
}
