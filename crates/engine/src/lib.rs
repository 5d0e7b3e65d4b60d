// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Nimbus execution engine

mod cluster;
mod error;
mod executor;
mod failover;
mod jobs;
mod lane;
mod reconcile;
mod requests;
mod runtime;
mod scheduler;

pub use cluster::{ClusterManager, ClusterRecord, ClusterUp, LaunchOptions};
pub use error::EngineError;
pub use executor::Executor;
pub use failover::{
    describe_request, ContextScheduler, FailoverConfig, FailoverError, Placement, SkipReason,
    Skipped,
};
pub use jobs::{JobSelector, JobTracker, LogEntry, LogsOutput};
pub use lane::Lanes;
pub use reconcile::{ReconcileReport, StaleJobReconciler, EVENT_INTERVAL_SECONDS};
pub use requests::{CancelOutcome, Completion, RequestManager, RequestScope, RequestTicket};
pub use runtime::{ExecResult, LaunchResult, Runtime, RuntimeConfig, RuntimeDeps};
pub use scheduler::Scheduler;
