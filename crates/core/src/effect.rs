// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effects and events for state machine orchestration

use crate::job::{JobId, JobStatus};
use crate::request::{RequestId, RequestStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Effects are side effects that state machines request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Emit an event for other components to observe
    Emit(Event),
    /// Set a timer
    SetTimer { id: String, duration: Duration },
    /// Cancel a timer
    CancelTimer { id: String },
}

/// Events emitted by state machines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ClusterProvisioned {
        cluster: String,
        context: String,
    },
    ClusterStopped {
        cluster: String,
    },
    ClusterProvisionFailed {
        cluster: String,
        reason: String,
    },

    JobStarted {
        cluster: String,
        job_id: JobId,
    },
    JobFinished {
        cluster: String,
        job_id: JobId,
        status: JobStatus,
    },

    RequestFinished {
        id: RequestId,
        status: RequestStatus,
    },
}

impl Event {
    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            Event::ClusterProvisioned { .. } => "cluster:provisioned",
            Event::ClusterStopped { .. } => "cluster:stopped",
            Event::ClusterProvisionFailed { .. } => "cluster:provision_failed",
            Event::JobStarted { .. } => "job:started",
            Event::JobFinished { .. } => "job:finished",
            Event::RequestFinished { .. } => "request:finished",
        }
    }
}

#[cfg(test)]
#[path = "effect_tests.rs"]
mod tests;
