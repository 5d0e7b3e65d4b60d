// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine

use crate::failover::FailoverError;
use nb_adapters::BackendError;
use nb_core::{ClusterStatus, JobId};
use nb_storage::WalError;
use thiserror::Error;

/// Errors surfaced to foreground callers
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cluster {0} does not exist")]
    ClusterNotFound(String),
    #[error("cluster {cluster} is {status}, not UP")]
    ClusterNotUp {
        cluster: String,
        status: ClusterStatus,
    },
    #[error(
        "requested resources {requested} do not fit cluster {cluster} (launched with {launched}); \
         launch a new cluster or down this one first"
    )]
    ResourcesMismatch {
        cluster: String,
        launched: String,
        requested: String,
    },
    #[error("failed to provision cluster {cluster}: {reason}")]
    Provision { cluster: String, reason: String },
    #[error(transparent)]
    Failover(#[from] FailoverError),
    #[error("job {job_id} not found on cluster {cluster}")]
    JobNotFound { cluster: String, job_id: JobId },
    #[error("request not found: {0}")]
    RequestNotFound(String),
    #[error("request {id} failed: {message}")]
    RequestFailed { id: String, message: String },
    #[error("{0} was cancelled")]
    Cancelled(String),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("storage error: {0}")]
    Storage(#[from] WalError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}
