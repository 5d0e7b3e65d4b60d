// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for daemon client behavior.

use super::*;
use std::fs;
use tempfile::tempdir;
use tokio::net::UnixListener;

fn temp_paths(dir: &tempfile::TempDir) -> DaemonPaths {
    DaemonPaths::at(&dir.path().join("state"), dir.path())
}

/// Serve one connection, answering with `response`
fn serve_once(listener: UnixListener, response: Response) -> tokio::task::JoinHandle<Request> {
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        let request = protocol::read_request(&mut reader, protocol::DEFAULT_TIMEOUT)
            .await
            .unwrap();
        protocol::write_response(&mut writer, &response, protocol::DEFAULT_TIMEOUT)
            .await
            .unwrap();
        request
    })
}

/// connect() must not delete state files while a daemon is mid-startup
#[test]
fn connect_does_not_delete_pid_file() {
    let temp = tempdir().unwrap();
    let paths = temp_paths(&temp);
    fs::create_dir_all(&paths.state_dir).unwrap();
    fs::write(&paths.lock_path, "12345\n").unwrap();

    let result = DaemonClient::connect(&paths);
    assert!(matches!(result, Err(ClientError::DaemonNotRunning)));

    assert!(paths.lock_path.exists(), "connect() must not delete pid file");
    assert_eq!(read_daemon_pid(&paths), Some(12345));
}

#[test]
fn startup_error_is_read_from_last_attempt() {
    let log = format!(
        "{p}100) ---\nERROR Failed to start daemon: old failure\n\
         {p}200) ---\n2026-01-01T00:00:00Z  INFO nbd: Starting nbd\n\
         ERROR Failed to start daemon: invalid config: provision.max_attempts must be at least 1\n",
        p = STARTUP_MARKER_PREFIX
    );
    let err = startup_error_in(&log).unwrap();
    assert!(err.contains("max_attempts"), "got: {}", err);
    assert!(!err.contains("old failure"), "got: {}", err);
}

#[test]
fn clean_startup_has_no_error() {
    let log = format!(
        "{}42) ---\n2026-01-01T00:00:00Z  INFO nbd: Daemon ready\n",
        STARTUP_MARKER_PREFIX
    );
    assert_eq!(startup_error_in(&log), None);
    assert_eq!(startup_error_in("no marker at all"), None);
}

#[tokio::test]
async fn send_roundtrip_over_socket() {
    let temp = tempdir().unwrap();
    let paths = temp_paths(&temp);
    let listener = UnixListener::bind(&paths.socket_path).unwrap();
    let server = serve_once(listener, Response::Pong);

    let client = DaemonClient::connect(&paths).unwrap();
    let response = client.send(Request::Ping).await.unwrap();

    assert_eq!(response, Response::Pong);
    assert_eq!(server.await.unwrap(), Request::Ping);
}

#[tokio::test]
async fn error_response_becomes_rejected() {
    let temp = tempdir().unwrap();
    let paths = temp_paths(&temp);
    let listener = UnixListener::bind(&paths.socket_path).unwrap();
    let server = serve_once(
        listener,
        Response::Error {
            message: "cluster c1 does not exist".to_string(),
        },
    );

    let client = DaemonClient::connect(&paths).unwrap();
    let err = client.queue("c1").await.unwrap_err();

    assert!(matches!(err, ClientError::Rejected(_)));
    assert_eq!(err.to_string(), "cluster c1 does not exist");
    server.await.unwrap();
}

#[tokio::test]
async fn mismatched_response_is_unexpected() {
    let temp = tempdir().unwrap();
    let paths = temp_paths(&temp);
    let listener = UnixListener::bind(&paths.socket_path).unwrap();
    let server = serve_once(listener, Response::Pong);

    let client = DaemonClient::connect(&paths).unwrap();
    let err = client.status().await.unwrap_err();

    assert!(matches!(err, ClientError::UnexpectedResponse));
    server.await.unwrap();
}

#[tokio::test]
async fn stop_without_daemon_cleans_stale_pid() {
    let temp = tempdir().unwrap();
    let paths = temp_paths(&temp);
    fs::create_dir_all(&paths.state_dir).unwrap();
    fs::write(&paths.lock_path, "999999\n").unwrap();

    let stopped = daemon_stop(&paths).await.unwrap();

    assert!(!stopped);
    assert!(!paths.lock_path.exists());
}
