// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compute backend adapters
//!
//! A backend provisions clusters and runs job drivers on them. A driver is
//! registered per job before any command runs and released once the job has
//! reached a terminal state; the reconciler uses driver liveness to find jobs
//! whose cluster went away underneath them.

mod local;

pub use local::LocalBackend;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{BackendCall, FakeBackend};

use async_trait::async_trait;
use nb_core::{ClusterHandle, ClusterStatus, JobId, LaunchedResources};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from backend operations
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("provision failed: {0}")]
    ProvisionFailed(String),
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),
    #[error("cluster {0} is not up")]
    ClusterNotUp(String),
    #[error("no driver for job {job_id} on {cluster}")]
    DriverNotFound { cluster: String, job_id: JobId },
    #[error("operation cancelled")]
    Cancelled,
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which part of a job a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Run,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => f.write_str("setup"),
            Phase::Run => f.write_str("run"),
        }
    }
}

/// How a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Exited(i32),
    /// The caller's token or a job cancel stopped the command
    Cancelled,
    /// The driver went away (cluster stopped or torn down)
    DriverLost,
}

/// Adapter for cluster provisioning and job execution
#[async_trait]
pub trait Backend: Clone + Send + Sync + 'static {
    /// Provision a new cluster on `resources.context`
    async fn provision(
        &self,
        cluster: &str,
        resources: &LaunchedResources,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError>;

    /// Bring a stopped cluster back up on its original context
    async fn restart(
        &self,
        handle: &ClusterHandle,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle, BackendError>;

    async fn stop(&self, handle: &ClusterHandle) -> Result<(), BackendError>;

    async fn teardown(&self, handle: &ClusterHandle) -> Result<(), BackendError>;

    /// Status as the backend sees it; `None` when it has no such cluster
    async fn cluster_status(
        &self,
        handle: &ClusterHandle,
    ) -> Result<Option<ClusterStatus>, BackendError>;

    /// Register the driver for a job
    async fn start_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError>;

    /// Run one phase of a job to completion, appending its output to the job log
    async fn run_phase(
        &self,
        handle: &ClusterHandle,
        job_id: JobId,
        phase: Phase,
        command: &str,
        envs: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutcome, BackendError>;

    /// Release the driver once the job is terminal
    async fn finish_driver(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError>;

    /// Kill a job's running command, if any
    async fn cancel_job(&self, handle: &ClusterHandle, job_id: JobId) -> Result<(), BackendError>;

    async fn driver_alive(&self, handle: &ClusterHandle, job_id: JobId) -> Result<bool, BackendError>;

    /// Everything the job has written so far
    async fn job_output(&self, handle: &ClusterHandle, job_id: JobId) -> Result<String, BackendError>;
}
