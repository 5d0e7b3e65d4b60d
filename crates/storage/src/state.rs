// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

use nb_core::{Cluster, Job, JobId, Operation, Request, RequestId};
use std::collections::{BTreeMap, HashMap};

/// Materialized state built from WAL operations
#[derive(Debug, Default, Clone)]
pub struct MaterializedState {
    pub clusters: BTreeMap<String, Cluster>,
    /// Jobs keyed by cluster, then by id
    pub jobs: BTreeMap<String, BTreeMap<JobId, Job>>,
    pub requests: HashMap<RequestId, Request>,
}

impl MaterializedState {
    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.get(name)
    }

    pub fn job(&self, cluster: &str, id: JobId) -> Option<&Job> {
        self.jobs.get(cluster).and_then(|jobs| jobs.get(&id))
    }

    /// Jobs of a cluster in id order
    pub fn jobs_of(&self, cluster: &str) -> impl Iterator<Item = &Job> {
        self.jobs.get(cluster).into_iter().flat_map(|jobs| jobs.values())
    }

    /// Next id the cluster would hand out
    pub fn next_job_id(&self, cluster: &str) -> JobId {
        let last = self
            .jobs
            .get(cluster)
            .and_then(|jobs| jobs.keys().next_back())
            .map(|id| id.0)
            .unwrap_or(0);
        JobId(last + 1)
    }

    /// Get a request by ID or unique prefix (like git commit hashes)
    pub fn get_request(&self, id: &str) -> Option<&Request> {
        if let Some(request) = self.requests.get(&RequestId::from(id)) {
            return Some(request);
        }

        let matches: Vec<_> = self
            .requests
            .iter()
            .filter(|(k, _)| k.0.starts_with(id))
            .collect();

        // Only return if exactly one match (unambiguous)
        if matches.len() == 1 {
            Some(matches[0].1)
        } else {
            None
        }
    }

    /// Drop finished requests older than the cutoff; in-flight ones stay
    pub fn prune_requests(&mut self, finished_before_ms: u64) -> usize {
        let before = self.requests.len();
        self.requests.retain(|_, r| {
            !r.is_terminal() || r.finished_at_ms.unwrap_or(r.created_at_ms) >= finished_before_ms
        });
        before - self.requests.len()
    }

    /// Operations that rebuild this state from scratch
    pub fn snapshot(&self) -> Vec<Operation> {
        let mut ops = Vec::new();
        for cluster in self.clusters.values() {
            ops.push(Operation::ClusterUpsert {
                cluster: cluster.clone(),
            });
        }
        for job in self.jobs.values().flat_map(|jobs| jobs.values()) {
            ops.push(Operation::JobUpsert { job: job.clone() });
        }
        let mut requests: Vec<_> = self.requests.values().collect();
        requests.sort_by_key(|r| (r.created_at_ms, r.id.clone()));
        for request in requests {
            ops.push(Operation::RequestUpsert {
                request: request.clone(),
            });
        }
        ops
    }

    /// Apply an operation to update the state
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::ClusterUpsert { cluster } => {
                self.clusters.insert(cluster.name.clone(), cluster.clone());
            }

            Operation::ClusterDelete { name } => {
                self.clusters.remove(name);
                self.jobs.remove(name);
            }

            Operation::JobUpsert { job } => {
                self.jobs
                    .entry(job.cluster.clone())
                    .or_default()
                    .insert(job.id, job.clone());
            }

            Operation::RequestUpsert { request } => {
                let mut request = request.clone();
                if let Some(existing) = self.requests.get(&request.id) {
                    if existing.log.len() > request.log.len() {
                        request.log = existing.log.clone();
                    }
                }
                self.requests.insert(request.id.clone(), request);
            }

            Operation::RequestLog { id, line } => {
                if let Some(request) = self.requests.get_mut(id) {
                    request.log.push(line.clone());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
