// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use nb_core::{Clock, FakeClock, RequestKind, RequestStatus};

fn job(cluster: &str, id: u64, clock: &FakeClock) -> Operation {
    Operation::JobUpsert {
        job: Job::new(JobId(id), cluster, clock),
    }
}

#[test]
fn apply_cluster_upsert_and_delete_drops_jobs() {
    let clock = FakeClock::new();
    let mut state = MaterializedState::default();
    state.apply(&Operation::ClusterUpsert {
        cluster: Cluster::new("c1", &clock),
    });
    state.apply(&job("c1", 1, &clock));
    assert!(state.cluster("c1").is_some());
    assert_eq!(state.jobs_of("c1").count(), 1);

    state.apply(&Operation::ClusterDelete {
        name: "c1".to_string(),
    });
    assert!(state.cluster("c1").is_none());
    assert_eq!(state.jobs_of("c1").count(), 0);
    assert_eq!(state.next_job_id("c1"), JobId(1));
}

#[test]
fn next_job_id_follows_highest_id() {
    let clock = FakeClock::new();
    let mut state = MaterializedState::default();
    assert_eq!(state.next_job_id("c1"), JobId(1));
    state.apply(&job("c1", 1, &clock));
    state.apply(&job("c1", 2, &clock));
    state.apply(&job("c2", 1, &clock));
    assert_eq!(state.next_job_id("c1"), JobId(3));
    assert_eq!(state.next_job_id("c2"), JobId(2));
}

#[test]
fn request_log_survives_upsert() {
    let clock = FakeClock::new();
    let mut state = MaterializedState::default();
    let request = Request::new("req-abc", RequestKind::Exec, "c1", &clock);
    state.apply(&Operation::RequestUpsert {
        request: request.clone(),
    });
    state.apply(&Operation::RequestLog {
        id: request.id.clone(),
        line: "dispatched".to_string(),
    });
    state.apply(&Operation::RequestUpsert { request });

    let stored = state.get_request("req-abc").unwrap();
    assert_eq!(stored.log, vec!["dispatched".to_string()]);
}

#[test]
fn get_request_by_unique_prefix() {
    let clock = FakeClock::new();
    let mut state = MaterializedState::default();
    for id in ["abc-1", "abd-2"] {
        state.apply(&Operation::RequestUpsert {
            request: Request::new(id, RequestKind::Launch, "c1", &clock),
        });
    }
    assert_eq!(state.get_request("abc").unwrap().id.0, "abc-1");
    assert!(state.get_request("ab").is_none());
    assert!(state.get_request("zz").is_none());
}

#[test]
fn snapshot_rebuilds_same_state() {
    let clock = FakeClock::new();
    let mut state = MaterializedState::default();
    state.apply(&Operation::ClusterUpsert {
        cluster: Cluster::new("c1", &clock),
    });
    state.apply(&job("c1", 1, &clock));
    state.apply(&Operation::RequestUpsert {
        request: Request::new("r1", RequestKind::Launch, "c1", &clock),
    });
    state.apply(&Operation::RequestLog {
        id: RequestId::from("r1"),
        line: "hello".to_string(),
    });

    let mut rebuilt = MaterializedState::default();
    for op in state.snapshot() {
        rebuilt.apply(&op);
    }
    assert_eq!(rebuilt.clusters, state.clusters);
    assert_eq!(rebuilt.jobs, state.jobs);
    assert_eq!(rebuilt.requests, state.requests);
}

#[test]
fn prune_drops_only_old_finished_requests() {
    let clock = FakeClock::new();
    let mut state = MaterializedState::default();
    let mut old = Request::new("req-old", RequestKind::Down, "gone", &clock);
    old.status = RequestStatus::Succeeded;
    old.finished_at_ms = Some(clock.epoch_ms());
    let stuck = Request::new("req-stuck", RequestKind::Exec, "c1", &clock);

    clock.advance(std::time::Duration::from_secs(60));
    let mut recent = Request::new("req-recent", RequestKind::Exec, "c1", &clock);
    recent.status = RequestStatus::Failed;
    recent.finished_at_ms = Some(clock.epoch_ms());

    for request in [old, stuck, recent] {
        state.apply(&Operation::RequestUpsert { request });
    }

    let pruned = state.prune_requests(clock.epoch_ms() - 30_000);
    assert_eq!(pruned, 1);
    assert!(state.get_request("req-old").is_none());
    assert!(state.get_request("req-stuck").is_some());
    assert!(state.get_request("req-recent").is_some());
    assert!(state
        .snapshot()
        .iter()
        .all(|op| !matches!(op, Operation::RequestUpsert { request } if request.id.0 == "req-old")));
}
