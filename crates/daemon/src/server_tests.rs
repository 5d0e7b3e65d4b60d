// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use nb_adapters::{FakeBackend, FakeContextProbe};
use nb_core::{
    AcceleratorRequest, FakeClock, Inventory, JobId, JobStatus, Reachability, RequestStatus,
    ResourceSpec, SequentialIdGen, Task, EXIT_SUCCEEDED,
};
use nb_engine::{FailoverConfig, JobSelector, LaunchOptions, RuntimeConfig, RuntimeDeps};
use nb_storage::Store;
use std::time::Duration;

type TestContext = ServerContext<FakeBackend, FakeContextProbe, FakeClock, SequentialIdGen>;

fn setup() -> (TestContext, tempfile::TempDir) {
    let logs = tempfile::tempdir().unwrap();
    let probe = FakeContextProbe::new().with_context(
        "ctx",
        Reachability::Reachable,
        Inventory::new().with("H100", 8),
    );
    let runtime = Runtime::new(
        RuntimeDeps {
            backend: FakeBackend::new(),
            probe,
            store: Store::in_memory(),
        },
        FakeClock::new(),
        SequentialIdGen::new("req"),
        RuntimeConfig {
            failover: FailoverConfig {
                allowed_contexts: vec!["ctx".to_string()],
                probe_timeout: Duration::from_secs(1),
            },
            logs_root: logs.path().to_path_buf(),
            reconcile_interval: Duration::from_secs(300),
        },
    );
    let ctx = ServerContext::new(runtime, Instant::now(), CancellationToken::new());
    (ctx, logs)
}

fn train() -> Task {
    Task::new()
        .with_setup("pip install -r requirements.txt")
        .with_run("python train.py")
        .with_resources(ResourceSpec::default().with_accelerator(AcceleratorRequest::new("H100", 2)))
}

fn launch(detach: bool) -> Request {
    Request::Launch {
        cluster: "c1".to_string(),
        task: train(),
        options: LaunchOptions::default(),
        detach,
    }
}

#[tokio::test]
async fn ping_and_hello() {
    let (ctx, _logs) = setup();
    assert_eq!(ctx.handle_request(Request::Ping).await, Response::Pong);
    assert_eq!(
        ctx.handle_request(Request::Hello {
            version: "0.0.0".to_string()
        })
        .await,
        Response::Hello {
            version: PROTOCOL_VERSION.to_string()
        }
    );
}

#[tokio::test]
async fn sync_launch_answers_with_terminal_job() {
    let (ctx, _logs) = setup();

    let Response::Launched { result } = ctx.handle_request(launch(false)).await else {
        panic!("expected Launched");
    };
    assert_eq!(result.job_id, Some(JobId(1)));
    assert_eq!(result.job_status, Some(JobStatus::Succeeded));

    let Response::Queue { jobs } = ctx
        .handle_request(Request::Queue {
            cluster: "c1".to_string(),
        })
        .await
    else {
        panic!("expected Queue");
    };
    assert_eq!(jobs.len(), 1);

    let Response::Logs { output } = ctx
        .handle_request(Request::Logs {
            cluster: "c1".to_string(),
            selectors: vec![JobSelector::Latest],
            sync_down: false,
        })
        .await
    else {
        panic!("expected Logs");
    };
    assert_eq!(output.exit_code, EXIT_SUCCEEDED);
}

#[tokio::test]
async fn detached_launch_returns_ticket_and_follow_waits() {
    let (ctx, _logs) = setup();

    let Response::Submitted { ticket } = ctx.handle_request(launch(true)).await else {
        panic!("expected Submitted");
    };
    assert!(ticket.cancel_hint.contains(&ticket.request_id.0));

    let Response::RequestLogs { request, lines } = ctx
        .handle_request(Request::RequestLogs {
            request_id: ticket.request_id.0.clone(),
            follow: true,
        })
        .await
    else {
        panic!("expected RequestLogs");
    };
    assert_eq!(request.status, RequestStatus::Succeeded);
    assert!(
        lines.iter().any(|l| l.contains("Job submitted with ID: 1")),
        "lines: {:?}",
        lines
    );

    let Response::Requests { requests } = ctx
        .handle_request(Request::RequestStatus { request_id: None })
        .await
    else {
        panic!("expected Requests");
    };
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn engine_errors_become_error_responses() {
    let (ctx, _logs) = setup();

    let response = ctx
        .handle_request(Request::Queue {
            cluster: "missing".to_string(),
        })
        .await;
    let Response::Error { message } = response else {
        panic!("expected Error, got {:?}", response);
    };
    assert!(message.contains("does not exist"), "got: {}", message);

    let response = ctx
        .handle_request(Request::CancelRequest {
            request_id: "nope".to_string(),
        })
        .await;
    assert!(matches!(response, Response::Error { .. }));
}

#[tokio::test]
async fn status_counts_up_clusters() {
    let (ctx, _logs) = setup();
    ctx.handle_request(launch(false)).await;

    let Response::Status { status } = ctx.handle_request(Request::Status).await else {
        panic!("expected Status");
    };
    assert_eq!(status.clusters_up, 1);
    assert_eq!(status.jobs_active, 0);
    assert_eq!(status.requests_inflight, 0);
}

#[tokio::test]
async fn show_gpus_reports_free_accelerators() {
    let (ctx, _logs) = setup();
    ctx.handle_request(launch(false)).await;

    let Response::Gpus { contexts } = ctx.handle_request(Request::ShowGpus { context: None }).await
    else {
        panic!("expected Gpus");
    };
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].context, "ctx");
    assert_eq!(contexts[0].available, Some(Inventory::new().with("H100", 6)));

    let Response::Gpus { contexts } = ctx
        .handle_request(Request::ShowGpus {
            context: Some("elsewhere".to_string()),
        })
        .await
    else {
        panic!("expected Gpus");
    };
    assert!(contexts[0].available.is_none());
    assert!(contexts[0].error.is_some());
}

#[tokio::test]
async fn sync_down_forgets_cluster() {
    let (ctx, _logs) = setup();
    ctx.handle_request(launch(false)).await;

    let response = ctx
        .handle_request(Request::Down {
            cluster: "c1".to_string(),
            detach: false,
        })
        .await;
    assert!(matches!(response, Response::Finished { .. }), "got {:?}", response);

    let Response::Clusters { clusters } = ctx
        .handle_request(Request::ClusterStatus {
            cluster: None,
            refresh: false,
        })
        .await
    else {
        panic!("expected Clusters");
    };
    assert!(clusters.is_empty());
}

#[tokio::test]
async fn shutdown_request_cancels_token() {
    let (ctx, _logs) = setup();
    assert_eq!(
        ctx.handle_request(Request::Shutdown).await,
        Response::ShuttingDown
    );
    assert!(ctx.shutdown.is_cancelled());
}

#[tokio::test]
async fn connection_roundtrip() {
    let (ctx, _logs) = setup();
    let (mut client, server) = tokio::io::duplex(4096);

    let task = tokio::spawn(async move { ctx.handle_connection(server).await });

    let data = protocol::encode(&Request::Ping).unwrap();
    protocol::write_message(&mut client, &data).await.unwrap();
    let bytes = protocol::read_message(&mut client).await.unwrap();
    assert_eq!(protocol::decode::<Response>(&bytes).unwrap(), Response::Pong);

    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn closed_connection_is_not_an_error() {
    let (ctx, _logs) = setup();
    let (client, server) = tokio::io::duplex(64);
    drop(client);
    ctx.handle_connection(server).await.unwrap();
}
