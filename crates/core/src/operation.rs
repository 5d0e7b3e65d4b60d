// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operations for the write-ahead log

use crate::cluster::Cluster;
use crate::job::Job;
use crate::request::{Request, RequestId};
use serde::{Deserialize, Serialize};

/// Operations that can be persisted to the WAL
///
/// Records are written whole; replaying the log in order yields the last
/// committed version of every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Create or replace a cluster record
    ClusterUpsert { cluster: Cluster },

    /// Remove a cluster and every job it owned
    ClusterDelete { name: String },

    /// Create or replace a job record
    JobUpsert { job: Job },

    /// Create or replace a request record (log lines are kept)
    RequestUpsert { request: Request },

    /// Append a line to a request's log
    RequestLog { id: RequestId, line: String },
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
