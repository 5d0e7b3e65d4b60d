// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::Scheduler;
use nb_adapters::{BackendCall, FakeBackend};
use nb_core::{Cluster, ClusterStatus, FakeClock, LaunchedResources};
use std::time::Duration;
use yare::parameterized;

struct Harness {
    tracker: JobTracker<FakeBackend, FakeClock>,
    backend: FakeBackend,
    store: Store,
    handle: ClusterHandle,
    _logs: tempfile::TempDir,
}

async fn setup() -> Harness {
    let clock = FakeClock::new();
    let store = Store::in_memory();
    let backend = FakeBackend::new();
    let handle = backend
        .provision(
            "c1",
            &LaunchedResources {
                context: "ctx".to_string(),
                accelerator: None,
                cpus: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut cluster = Cluster::new("c1", &clock);
    cluster.status = ClusterStatus::Up;
    cluster.handle = Some(handle.clone());
    store.commit(Operation::ClusterUpsert { cluster }).unwrap();

    let logs = tempfile::tempdir().unwrap();
    let scheduler = Arc::new(Mutex::new(Scheduler::new()));
    let tracker = JobTracker::new(
        store.clone(),
        backend.clone(),
        clock.clone(),
        Executor::new(scheduler, clock),
        Lanes::new(),
        logs.path().to_path_buf(),
    );
    Harness {
        tracker,
        backend,
        store,
        handle,
        _logs: logs,
    }
}

fn task(run: &str) -> Task {
    Task::new().with_setup("make").with_run(run)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

async fn submit(h: &Harness, task: &Task, run_setup: bool) -> JobId {
    h.tracker
        .submit(&h.handle, task, run_setup, None)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn jobs_run_to_success_with_sequential_ids() {
    let h = setup().await;

    let first = submit(&h, &task("train"), true).await;
    let second = submit(&h, &task("eval"), true).await;

    assert_eq!(first, JobId(1));
    assert_eq!(second, JobId(2));
    let job = h.tracker.wait("c1", first).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.ended_at_ms.is_some());
    assert_eq!(
        h.tracker.wait("c1", second).await.unwrap().status,
        JobStatus::Succeeded
    );
    eventually(|| !h.tracker.has_worker("c1", first)).await;
    assert!(!h.backend.has_driver("c1", first));
}

#[tokio::test]
async fn task_with_nothing_to_run_gets_no_job() {
    let h = setup().await;

    let id = h
        .tracker
        .submit(&h.handle, &Task::new().with_setup("make"), false, None)
        .await
        .unwrap();

    assert_eq!(id, None);
    assert!(h.tracker.queue("c1").unwrap().is_empty());
    assert_eq!(submit(&h, &task("train"), true).await, JobId(1));
}

#[tokio::test]
async fn submit_requires_an_up_cluster() {
    let h = setup().await;
    h.store
        .update(|s| {
            let mut cluster = s.cluster("c1")?.clone();
            cluster.status = ClusterStatus::Stopped;
            Some((Operation::ClusterUpsert { cluster }, ()))
        })
        .unwrap();

    let err = h
        .tracker
        .submit(&h.handle, &task("train"), true, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::ClusterNotUp {
            status: ClusterStatus::Stopped,
            ..
        }
    ));
    assert!(h.tracker.queue("c1").unwrap().is_empty());
}

#[tokio::test]
async fn wait_returns_when_the_cluster_stops_under_the_job() {
    let h = setup().await;
    h.backend.hold_jobs();
    let id = submit(&h, &task("train"), true).await;
    eventually(|| h.tracker.job("c1", id).is_some_and(|j| j.status == JobStatus::SettingUp)).await;

    let waiter = {
        let tracker = h.tracker.clone();
        tokio::spawn(async move { tracker.wait("c1", id).await })
    };
    h.store
        .update(|s| {
            let mut cluster = s.cluster("c1")?.clone();
            cluster.status = ClusterStatus::Stopped;
            Some((Operation::ClusterUpsert { cluster }, ()))
        })
        .unwrap();

    let job = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!job.is_terminal());
    h.backend.release_jobs();
}

#[tokio::test]
async fn failed_setup_skips_run() {
    let h = setup().await;
    h.backend.set_exit_code("make", 2);

    let id = submit(&h, &task("train"), true).await;
    let job = h.tracker.wait("c1", id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.exit_code, Some(2));
    assert!(!h.backend.calls().iter().any(|c| matches!(
        c,
        BackendCall::RunPhase {
            phase: Phase::Run,
            ..
        }
    )));
}

#[tokio::test]
async fn failed_run_reports_exit_code() {
    let h = setup().await;
    h.backend.set_exit_code("exit 3", 3);

    let id = submit(&h, &task("exit 3"), true).await;
    let job = h.tracker.wait("c1", id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.exit_code, Some(3));
}

#[tokio::test]
async fn setup_is_skipped_when_not_requested() {
    let h = setup().await;

    let id = submit(&h, &task("train"), false).await;
    h.tracker.wait("c1", id).await.unwrap();

    assert_eq!(h.backend.setup_count(), 0);
    assert_eq!(h.tracker.job("c1", id).unwrap().setup, None);
}

#[tokio::test]
async fn cancelling_a_running_job() {
    let h = setup().await;
    h.backend.hold_jobs();
    let id = submit(&h, &task("train"), true).await;
    eventually(|| h.tracker.job("c1", id).map(|j| j.status) == Some(JobStatus::Running)).await;

    let status = h.tracker.cancel("c1", id).await.unwrap();

    assert_eq!(status, JobStatus::Cancelled);
    assert_eq!(
        h.tracker.wait("c1", id).await.unwrap().status,
        JobStatus::Cancelled
    );
    assert!(h.backend.calls().contains(&BackendCall::CancelJob {
        cluster: "c1".to_string(),
        job_id: id,
    }));
    eventually(|| !h.tracker.has_worker("c1", id)).await;
    h.backend.release_jobs();
}

#[tokio::test]
async fn cancelling_a_finished_job_changes_nothing() {
    let h = setup().await;
    let id = submit(&h, &task("train"), true).await;
    h.tracker.wait("c1", id).await.unwrap();

    let status = h.tracker.cancel("c1", id).await.unwrap();

    assert_eq!(status, JobStatus::Succeeded);
    assert!(!h
        .backend
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::CancelJob { .. })));
}

#[tokio::test]
async fn cancelling_an_unknown_job_fails() {
    let h = setup().await;

    let err = h.tracker.cancel("c1", JobId(9)).await.unwrap_err();

    assert!(matches!(err, EngineError::JobNotFound { .. }));
}

#[tokio::test]
async fn lost_driver_leaves_status_for_reconciliation() {
    let h = setup().await;
    h.backend.hold_jobs();
    let id = submit(&h, &task("train"), true).await;
    eventually(|| h.tracker.job("c1", id).map(|j| j.status) == Some(JobStatus::Running)).await;

    h.backend.interrupt("c1");
    eventually(|| !h.tracker.has_worker("c1", id)).await;

    assert_eq!(h.tracker.job("c1", id).unwrap().status, JobStatus::Running);
    assert!(h.tracker.mark_driver_lost("c1", id).unwrap());
    assert_eq!(
        h.tracker.job("c1", id).unwrap().status,
        JobStatus::FailedDriver
    );
    assert!(!h.tracker.mark_driver_lost("c1", id).unwrap());
}

#[tokio::test]
async fn abandoning_a_cluster_cancels_active_jobs() {
    let h = setup().await;
    let done = submit(&h, &task("train"), true).await;
    h.tracker.wait("c1", done).await.unwrap();
    h.backend.hold_jobs();
    let held = submit(&h, &task("eval"), true).await;

    let abandoned = h.tracker.abandon_cluster("c1").await.unwrap();

    assert_eq!(abandoned, 1);
    assert_eq!(
        h.tracker.wait("c1", held).await.unwrap().status,
        JobStatus::Cancelled
    );
    assert!(h.tracker.active_jobs("c1").is_empty());
    h.backend.release_jobs();
}

#[tokio::test]
async fn queue_of_unknown_cluster_fails() {
    let h = setup().await;

    assert!(matches!(
        h.tracker.queue("nope"),
        Err(EngineError::ClusterNotFound(_))
    ));
}

#[tokio::test]
async fn logs_of_succeeded_and_failed_jobs() {
    let h = setup().await;
    h.backend.set_exit_code("false", 1);
    let ok = submit(&h, &task("train"), true).await;
    let bad = submit(&h, &task("false"), true).await;
    h.tracker.wait("c1", ok).await.unwrap();
    h.tracker.wait("c1", bad).await.unwrap();

    let one = h.tracker.logs("c1", &[JobSelector::Id(ok)], false).await.unwrap();
    assert_eq!(one.exit_code, 0);
    assert!(one.entries[0].text.contains("run: train"), "{:?}", one);

    let latest = h.tracker.logs("c1", &[JobSelector::Latest], false).await.unwrap();
    assert_eq!(latest.entries.len(), 1);
    assert_eq!(latest.entries[0].job_id, bad);
    assert_eq!(latest.exit_code, 100);

    let all = h.tracker.logs("c1", &[JobSelector::All], false).await.unwrap();
    assert_eq!(all.entries.len(), 2);
    assert_eq!(all.exit_code, 100);
}

#[tokio::test]
async fn logs_of_missing_job() {
    let h = setup().await;

    let out = h.tracker.logs("c1", &[JobSelector::Id(JobId(7))], false).await.unwrap();

    assert_eq!(out.exit_code, 102);
    assert_eq!(out.entries[0].status, None);
    assert!(out.entries[0].text.contains("Job 7 not found."));

    let empty = h.tracker.logs("c1", &[JobSelector::Latest], false).await.unwrap();
    assert!(empty.entries.is_empty());
    assert_eq!(empty.exit_code, 102);
}

#[tokio::test]
async fn logs_of_several_ids_keep_order_and_skip_duplicates() {
    let h = setup().await;
    h.backend.set_exit_code("false", 1);
    let first = submit(&h, &task("train"), true).await;
    let second = submit(&h, &task("false"), true).await;
    h.tracker.wait("c1", first).await.unwrap();
    h.tracker.wait("c1", second).await.unwrap();

    let selectors = [
        JobSelector::Id(second),
        JobSelector::Id(first),
        JobSelector::Latest,
        JobSelector::Id(JobId(9)),
    ];
    let out = h.tracker.logs("c1", &selectors, false).await.unwrap();

    let ids: Vec<JobId> = out.entries.iter().map(|e| e.job_id).collect();
    assert_eq!(ids, vec![second, first, JobId(9)]);
    assert_eq!(out.entries[2].status, None);
    assert_eq!(out.exit_code, 100);

    let none = h.tracker.logs("c1", &[], false).await.unwrap();
    assert_eq!(none.entries.len(), 1);
    assert_eq!(none.entries[0].job_id, second);
}

#[tokio::test]
async fn logs_of_cancelled_job_carry_a_trailer() {
    let h = setup().await;
    h.backend.hold_jobs();
    let id = submit(&h, &task("train"), true).await;
    h.tracker.cancel("c1", id).await.unwrap();

    let out = h.tracker.logs("c1", &[JobSelector::Id(id)], false).await.unwrap();

    assert_eq!(out.exit_code, 103);
    assert!(out.entries[0].text.ends_with("Job 1 was cancelled.\n"));
    h.backend.release_jobs();
}

#[tokio::test]
async fn logs_can_be_synced_down() {
    let h = setup().await;
    let id = submit(&h, &task("train"), true).await;
    h.tracker.wait("c1", id).await.unwrap();

    let out = h.tracker.logs("c1", &[JobSelector::Id(id)], true).await.unwrap();

    let dir = out.entries[0].path.clone().unwrap();
    assert!(dir.ends_with("c1/job-1"));
    let written = std::fs::read_to_string(dir.join("run.log")).unwrap();
    assert_eq!(written, out.entries[0].text);
}

#[parameterized(
    latest = { "latest", JobSelector::Latest },
    empty = { "", JobSelector::Latest },
    star = { "*", JobSelector::All },
    all = { "all", JobSelector::All },
    id = { "12", JobSelector::Id(JobId(12)) },
)]
fn parses_job_selectors(input: &str, expected: JobSelector) {
    assert_eq!(input.parse::<JobSelector>().unwrap(), expected);
}

#[test]
fn rejects_garbage_selectors() {
    assert!("twelve".parse::<JobSelector>().is_err());
}
