// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::failover::FailoverConfig;
use crate::Scheduler;
use nb_adapters::{BackendCall, FakeBackend, FakeContextProbe};
use nb_core::{AcceleratorRequest, FakeClock, Inventory, Job, JobId, Reachability};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use yare::parameterized;

struct Harness {
    manager: ClusterManager<FakeBackend, FakeContextProbe, FakeClock>,
    backend: FakeBackend,
    failover: ContextScheduler<FakeContextProbe>,
    scheduler: Arc<Mutex<Scheduler>>,
    store: Store,
    clock: FakeClock,
}

fn setup() -> Harness {
    let clock = FakeClock::new();
    let store = Store::in_memory();
    let backend = FakeBackend::new();
    let probe = FakeContextProbe::new().with_context(
        "ctx",
        Reachability::Reachable,
        Inventory::new().with("H100", 8),
    );
    let failover = ContextScheduler::new(
        probe,
        FailoverConfig {
            allowed_contexts: vec!["ctx".to_string()],
            probe_timeout: Duration::from_secs(1),
        },
    );
    let scheduler = Arc::new(Mutex::new(Scheduler::new()));
    let executor = Executor::new(Arc::clone(&scheduler), clock.clone());
    let manager = ClusterManager::new(
        store.clone(),
        backend.clone(),
        failover.clone(),
        clock.clone(),
        executor,
        Lanes::new(),
    );
    Harness {
        manager,
        backend,
        failover,
        scheduler,
        store,
        clock,
    }
}

fn h100(count: u32) -> ResourceSpec {
    ResourceSpec::default().with_accelerator(AcceleratorRequest::new("H100", count))
}

fn token() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn launch_on_absent_cluster_provisions_and_allocates() {
    let h = setup();

    let up = h.manager.ensure_up("c1", &h100(2), &token()).await.unwrap();

    assert!(!up.reused);
    assert_eq!(up.handle.context, "ctx");
    let cluster = h.manager.get("c1").unwrap();
    assert_eq!(cluster.status, ClusterStatus::Up);
    assert_eq!(h.failover.allocated("ctx").count("H100"), 2);
    assert_eq!(h.backend.provision_count(), 1);
}

#[tokio::test]
async fn relaunch_on_up_cluster_reuses_it() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(2), &token()).await.unwrap();

    let up = h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();

    assert!(up.reused);
    assert_eq!(h.backend.provision_count(), 1);
}

#[tokio::test]
async fn relaunch_with_larger_request_is_a_mismatch() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(2), &token()).await.unwrap();

    let err = h.manager.ensure_up("c1", &h100(4), &token()).await.unwrap_err();

    assert!(matches!(err, EngineError::ResourcesMismatch { .. }), "{:?}", err);
    assert_eq!(h.backend.provision_count(), 1);
}

#[tokio::test]
async fn provision_failure_leaves_init_record_and_releases_allocation() {
    let h = setup();
    h.backend.fail_provisions(1);

    let err = h.manager.ensure_up("c1", &h100(8), &token()).await.unwrap_err();

    assert!(matches!(err, EngineError::Provision { .. }), "{:?}", err);
    assert_eq!(h.manager.get("c1").unwrap().status, ClusterStatus::Init);
    assert_eq!(h.failover.allocated("ctx").count("H100"), 0);

    // INIT is provisioned again on the next launch
    let up = h.manager.ensure_up("c1", &h100(8), &token()).await.unwrap();
    assert!(!up.reused);
    assert!(h.manager.get("c1").unwrap().is_up());
}

#[tokio::test]
async fn cancelled_provisioning_releases_allocation() {
    let h = setup();
    h.backend.set_provision_delay(Duration::from_secs(60));
    let cancel = token();

    let task = {
        let manager = h.manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.ensure_up("c1", &h100(8), &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled(), "{:?}", err);
    assert_eq!(h.manager.get("c1").unwrap().status, ClusterStatus::Init);
    assert_eq!(h.failover.allocated("ctx").count("H100"), 0);
}

#[tokio::test]
async fn stop_and_start_round_trip_releases_and_restores_ledger() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(4), &token()).await.unwrap();

    let stopped = h.manager.stop("c1").await.unwrap();
    assert_eq!(stopped.status, ClusterStatus::Stopped);
    assert_eq!(h.failover.allocated("ctx").count("H100"), 0);

    // Stopping again is a no-op
    h.manager.stop("c1").await.unwrap();

    let handle = h.manager.start("c1", &token()).await.unwrap();
    assert_eq!(handle.context, "ctx");
    assert!(h.manager.get("c1").unwrap().is_up());
    assert_eq!(h.failover.allocated("ctx").count("H100"), 4);
    assert!(h.backend.calls().contains(&BackendCall::Restart {
        cluster: "c1".to_string()
    }));
}

#[tokio::test]
async fn launch_on_stopped_cluster_restarts_on_original_context() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();
    h.manager.stop("c1").await.unwrap();

    let up = h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();

    assert!(!up.reused);
    assert_eq!(up.handle.context, "ctx");
    assert_eq!(h.backend.provision_count(), 2);
}

#[tokio::test]
async fn out_of_band_stop_is_noticed_before_reuse() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();
    h.backend.interrupt("c1");

    let up = h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();

    assert!(!up.reused, "stopped cluster must be restarted, not reused");
    assert!(h.manager.get("c1").unwrap().is_up());
}

#[tokio::test]
async fn status_refresh_marks_interrupted_cluster_stopped() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();
    h.backend.interrupt("c1");

    let stale = h.manager.status(Some("c1"), false).await.unwrap();
    assert_eq!(stale[0].cluster.status, ClusterStatus::Up);

    let fresh = h.manager.status(Some("c1"), true).await.unwrap();
    assert_eq!(fresh[0].cluster.status, ClusterStatus::Stopped);
    assert_eq!(h.failover.allocated("ctx").count("H100"), 0);
}

#[tokio::test]
async fn status_of_unknown_cluster_is_empty() {
    let h = setup();
    assert!(h.manager.status(Some("nope"), true).await.unwrap().is_empty());
}

#[tokio::test]
async fn down_removes_record_and_allocation() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(3), &token()).await.unwrap();

    h.manager.down("c1").await.unwrap();

    assert!(h.manager.get("c1").is_none());
    assert_eq!(h.failover.allocated("ctx").count("H100"), 0);
    assert!(h.backend.cluster("c1").is_none());
    assert!(matches!(
        h.manager.down("c1").await,
        Err(EngineError::ClusterNotFound(_))
    ));
}

#[tokio::test]
async fn start_of_init_cluster_is_rejected() {
    let h = setup();
    h.backend.fail_provisions(1);
    let _ = h.manager.ensure_up("c1", &h100(1), &token()).await;

    let err = h.manager.start("c1", &token()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::ClusterNotUp {
            status: ClusterStatus::Init,
            ..
        }
    ));
}

#[tokio::test]
async fn autostop_stops_idle_cluster() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();
    h.manager
        .set_autostop(
            "c1",
            Some(Autostop {
                idle_minutes: 5,
                down: false,
            }),
        )
        .unwrap();

    h.clock.advance(Duration::from_secs(5 * 60));
    let fired = h.scheduler.lock().unwrap().fired_timers(h.clock.now());
    assert_eq!(fired, vec!["autostop:c1"]);

    h.manager.on_autostop("c1").await.unwrap();
    assert_eq!(h.manager.get("c1").unwrap().status, ClusterStatus::Stopped);
}

#[tokio::test]
async fn autostop_with_down_tears_cluster_down() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();
    h.manager
        .set_autostop(
            "c1",
            Some(Autostop {
                idle_minutes: 1,
                down: true,
            }),
        )
        .unwrap();

    h.manager.on_autostop("c1").await.unwrap();
    assert!(h.manager.get("c1").is_none());
    assert!(!h.scheduler.lock().unwrap().has_timer("autostop:c1"));
}

#[tokio::test]
async fn autostop_rearms_while_jobs_are_active() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();
    h.manager
        .set_autostop(
            "c1",
            Some(Autostop {
                idle_minutes: 1,
                down: false,
            }),
        )
        .unwrap();
    h.store
        .commit(Operation::JobUpsert {
            job: Job::new(JobId(1), "c1", &h.clock),
        })
        .unwrap();
    h.scheduler.lock().unwrap().cancel_timer("autostop:c1");

    h.manager.on_autostop("c1").await.unwrap();

    assert!(h.manager.get("c1").unwrap().is_up());
    assert!(h.scheduler.lock().unwrap().has_timer("autostop:c1"));
}

#[tokio::test]
async fn cancelling_autostop_clears_timer() {
    let h = setup();
    h.manager.ensure_up("c1", &h100(1), &token()).await.unwrap();
    h.manager
        .set_autostop(
            "c1",
            Some(Autostop {
                idle_minutes: 10,
                down: false,
            }),
        )
        .unwrap();
    assert!(h.scheduler.lock().unwrap().has_timer("autostop:c1"));

    h.manager.set_autostop("c1", None).unwrap();

    assert!(!h.scheduler.lock().unwrap().has_timers());
    assert_eq!(h.manager.get("c1").unwrap().autostop, None);
}

#[parameterized(
    unchanged = { None, false, None },
    cancel = { Some(-1), false, Some(None) },
    idle = { Some(10), false, Some(Some(Autostop { idle_minutes: 10, down: false })) },
    idle_down = { Some(10), true, Some(Some(Autostop { idle_minutes: 10, down: true })) },
    down_only = { None, true, Some(Some(Autostop { idle_minutes: 0, down: true })) },
)]
fn launch_options_map_to_autostop(minutes: Option<i32>, down: bool, expected: Option<Option<Autostop>>) {
    let opts = LaunchOptions {
        idle_minutes_to_autostop: minutes,
        down,
        fast: false,
    };
    assert_eq!(opts.autostop(), expected);
}
