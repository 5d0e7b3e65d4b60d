// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! nb-core: Core library for the Nimbus control plane
//!
//! This crate provides:
//! - Pure state machines for clusters, jobs and requests
//! - Task, resource and context descriptions
//! - Effects emitted by transitions and operations persisted to the WAL
//! - Clock and id abstractions for deterministic tests

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod clock;
pub mod id;

// State machines (order matters for dependencies)
pub mod resources;
pub mod context;
pub mod task;
pub mod cluster;
pub mod job;
pub mod request;
pub mod effect;
pub mod operation;

// Re-exports
pub use clock::{Clock, FakeClock, SystemClock};
pub use cluster::{autostop_timer_id, Autostop, Cluster, ClusterEvent, ClusterHandle, ClusterStatus};
pub use context::{Inventory, Reachability};
pub use effect::{Effect, Event};
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use job::{
    worst_exit_code, Job, JobEvent, JobId, JobStatus, EXIT_CANCELLED, EXIT_FAILED,
    EXIT_NOT_FINISHED, EXIT_NOT_FOUND, EXIT_SUCCEEDED,
};
pub use operation::Operation;
pub use request::{Request, RequestEvent, RequestId, RequestKind, RequestResult, RequestStatus};
pub use resources::{AcceleratorRequest, LaunchedResources, ResourceError, ResourceSpec};
pub use task::Task;
