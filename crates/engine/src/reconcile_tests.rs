// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::executor::Executor;
use crate::lane::Lanes;
use crate::Scheduler;
use nb_adapters::FakeBackend;
use nb_core::{Cluster, FakeClock, Job, LaunchedResources, Operation, Task};
use std::sync::{Arc, Mutex};

struct Harness {
    reconciler: StaleJobReconciler<FakeBackend, FakeClock>,
    jobs: JobTracker<FakeBackend, FakeClock>,
    backend: FakeBackend,
    store: Store,
    clock: FakeClock,
    handle: ClusterHandle,
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

    let executor = Executor::new(Arc::new(Mutex::new(Scheduler::new())), clock.clone());
    let jobs = JobTracker::new(
        store.clone(),
        backend.clone(),
        clock.clone(),
        executor,
        Lanes::new(),
        std::env::temp_dir(),
    );
    let reconciler = StaleJobReconciler::new(store.clone(), backend.clone(), jobs.clone());
    Harness {
        reconciler,
        jobs,
        backend,
        store,
        clock,
        handle,
    }
}

async fn running_job(h: &Harness) -> JobId {
    h.backend.hold_jobs();
    let id = h
        .jobs
        .submit(&h.handle, &Task::new().with_run("train"), true, None)
        .await
        .unwrap()
        .unwrap();
    for _ in 0..200 {
        if h.jobs.job("c1", id).map(|j| j.status) == Some(JobStatus::Running) {
            return id;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job never started");
}

#[tokio::test]
async fn lost_driver_is_marked_once_cluster_is_back() {
    let h = setup().await;
    let id = running_job(&h).await;

    h.backend.interrupt("c1");
    let report = h.reconciler.tick().await;
    assert_eq!(report.clusters_checked, 0);
    assert_eq!(h.jobs.job("c1", id).unwrap().status, JobStatus::Running);

    h.backend
        .restart(&h.handle, &CancellationToken::new())
        .await
        .unwrap();
    let report = h.reconciler.tick().await;
    assert_eq!(report.failed_driver, vec![("c1".to_string(), id)]);
    assert_eq!(
        h.jobs.job("c1", id).unwrap().status,
        JobStatus::FailedDriver
    );

    let again = h.reconciler.tick().await;
    assert!(again.failed_driver.is_empty());
    assert_eq!(again.jobs_checked, 0);
    h.backend.release_jobs();
}

#[tokio::test]
async fn live_jobs_are_left_alone() {
    let h = setup().await;
    let id = running_job(&h).await;

    let report = h.reconciler.tick().await;

    assert_eq!(report.clusters_checked, 1);
    assert_eq!(report.jobs_checked, 1);
    assert!(report.failed_driver.is_empty());
    assert_eq!(h.jobs.job("c1", id).unwrap().status, JobStatus::Running);
    h.backend.release_jobs();
}

#[tokio::test]
async fn orphaned_pending_job_is_failed() {
    let h = setup().await;
    let job = Job::new(JobId(1), "c1", &h.clock);
    h.store.commit(Operation::JobUpsert { job }).unwrap();

    let report = h.reconciler.tick().await;

    assert_eq!(report.failed_driver, vec![("c1".to_string(), JobId(1))]);
}

#[tokio::test]
async fn probe_errors_are_counted_and_change_nothing() {
    let h = setup().await;
    let id = running_job(&h).await;
    h.backend.set_unreachable(true);

    let report = h.reconciler.tick().await;

    assert_eq!(report.errors, 1);
    assert_eq!(h.jobs.job("c1", id).unwrap().status, JobStatus::Running);
    h.backend.set_unreachable(false);
    h.backend.release_jobs();
}

#[tokio::test]
async fn stopped_clusters_are_not_checked() {
    let h = setup().await;
    let job = Job::new(JobId(1), "c1", &h.clock);
    h.store.commit(Operation::JobUpsert { job }).unwrap();
    h.store
        .update(|s| {
            let mut cluster = s.cluster("c1")?.clone();
            cluster.status = ClusterStatus::Stopped;
            Some((Operation::ClusterUpsert { cluster }, ()))
        })
        .unwrap();

    let report = h.reconciler.tick().await;

    assert_eq!(report, ReconcileReport::default());
    assert_eq!(h.jobs.job("c1", JobId(1)).unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn spawned_reconciler_ticks_until_shutdown() {
    let h = setup().await;
    let job = Job::new(JobId(1), "c1", &h.clock);
    h.store.commit(Operation::JobUpsert { job }).unwrap();
    let shutdown = CancellationToken::new();

    let task = h
        .reconciler
        .clone()
        .spawn(Duration::from_millis(10), shutdown.clone());
    for _ in 0..200 {
        if h.jobs.job("c1", JobId(1)).map(|j| j.status) == Some(JobStatus::FailedDriver) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown.cancel();
    task.await.unwrap();

    assert_eq!(
        h.jobs.job("c1", JobId(1)).unwrap().status,
        JobStatus::FailedDriver
    );
}
