// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client for CLI commands

use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use nb_core::{Job, JobId, JobStatus, Request as RequestRecord, RequestResult, Task};
use nb_daemon::protocol::{self, ProtocolError};
use nb_daemon::{
    ContextGpus, DaemonPaths, DaemonStatus, NoStateDir, Request, Response, STARTUP_MARKER_PREFIX,
};
use nb_engine::{
    CancelOutcome, ClusterRecord, JobSelector, LaunchOptions, LaunchResult, LogsOutput,
    RequestTicket,
};
use thiserror::Error;
use tokio::net::UnixStream;

// Timeout configuration (env vars in milliseconds)
fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for short IPC requests (hello, status, queries, shutdown)
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("NB_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for requests the daemon answers only once work finishes
pub fn timeout_wait() -> Duration {
    parse_duration_ms("NB_TIMEOUT_WAIT_MS").unwrap_or(Duration::from_secs(7 * 24 * 60 * 60))
}

/// Timeout for waiting for daemon to start
pub fn timeout_connect() -> Duration {
    parse_duration_ms("NB_TIMEOUT_CONNECT_MS").unwrap_or(Duration::from_secs(5))
}

/// Timeout for waiting for process to exit
pub fn timeout_exit() -> Duration {
    parse_duration_ms("NB_TIMEOUT_EXIT_MS").unwrap_or(Duration::from_secs(2))
}

/// Polling interval for retries
pub fn poll_interval() -> Duration {
    parse_duration_ms("NB_POLL_INTERVAL_MS").unwrap_or(Duration::from_millis(50))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Failed to start daemon: {0}")]
    DaemonStartFailed(String),

    #[error("Connection timeout waiting for daemon to start")]
    DaemonStartTimeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Rejected(String),

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    NoStateDir(#[from] NoStateDir),
}

/// What the daemon answered for a launch, exec, stop, start or down
#[derive(Debug)]
pub enum Submission {
    /// Detached: the request runs in the background
    Ticket(RequestTicket),
    /// Launch or exec finished
    Launched(LaunchResult),
    /// Stop, start or down finished
    Finished(RequestResult),
}

/// Map an unexpected response to an error
fn unexpected(response: Response) -> ClientError {
    match response {
        Response::Error { message } => ClientError::Rejected(message),
        _ => ClientError::UnexpectedResponse,
    }
}

/// Daemon client
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Connect to daemon, auto-starting if not running
    pub async fn connect_or_start(paths: &DaemonPaths) -> Result<Self, ClientError> {
        // Restart a daemon left over from another version
        if let Ok(daemon_version) = std::fs::read_to_string(&paths.version_path) {
            if daemon_version.trim() != env!("CARGO_PKG_VERSION") {
                tracing::info!(daemon_version = daemon_version.trim(), "daemon version mismatch, restarting");
                let _ = daemon_stop(paths).await;
            }
        }

        match Self::connect(paths) {
            Ok(client) => Ok(client),
            Err(ClientError::DaemonNotRunning) => {
                let child = start_daemon_background()?;
                Self::connect_with_retry(paths, timeout_connect(), child).await
            }
            Err(e) => Err(wrap_with_startup_error(e, paths)),
        }
    }

    /// Connect to existing daemon (no auto-start)
    pub fn connect(paths: &DaemonPaths) -> Result<Self, ClientError> {
        if !paths.socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }

        Ok(Self {
            socket_path: paths.socket_path.clone(),
        })
    }

    pub async fn connect_with_retry(
        paths: &DaemonPaths,
        timeout: Duration,
        mut child: std::process::Child,
    ) -> Result<Self, ClientError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            // Daemon exited early: startup failed
            if let Ok(Some(status)) = child.try_wait() {
                // Poll for startup error in log (filesystem may need to sync)
                let poll_start = Instant::now();
                while poll_start.elapsed() < timeout_exit() {
                    if let Some(err) = read_startup_error(paths) {
                        return Err(ClientError::DaemonStartFailed(err));
                    }
                    tokio::time::sleep(poll_interval()).await;
                }
                return Err(ClientError::DaemonStartFailed(format!(
                    "exited with {}",
                    status
                )));
            }

            match Self::connect(paths) {
                Ok(client) => return Ok(client),
                Err(ClientError::DaemonNotRunning) => {
                    tokio::time::sleep(poll_interval()).await;
                }
                Err(e) => return Err(wrap_with_startup_error(e, paths)),
            }
        }

        Err(wrap_with_startup_error(ClientError::DaemonStartTimeout, paths))
    }

    /// Send a request and receive a response with specific timeouts
    async fn send_with_timeout(
        &self,
        request: &Request,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Response, ClientError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (mut reader, mut writer) = stream.into_split();

        let data = protocol::encode(request)?;
        tokio::time::timeout(write_timeout, protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        let response_bytes =
            tokio::time::timeout(read_timeout, protocol::read_message(&mut reader))
                .await
                .map_err(|_| ProtocolError::Timeout)??;

        let response: Response = protocol::decode(&response_bytes)?;
        Ok(response)
    }

    /// Send a request and receive a response
    ///
    /// Requests the daemon holds open until work finishes get the long wait timeout.
    pub async fn send(&self, request: Request) -> Result<Response, ClientError> {
        let read_timeout = match request.is_long_running() {
            true => timeout_wait(),
            false => timeout_ipc(),
        };
        self.send_with_timeout(&request, read_timeout, timeout_ipc())
            .await
    }

    /// Get daemon version via Hello handshake
    pub async fn hello(&self) -> Result<String, ClientError> {
        match self
            .send(Request::Hello {
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
            .await?
        {
            Response::Hello { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Get daemon status
    pub async fn status(&self) -> Result<DaemonStatus, ClientError> {
        match self.send(Request::Status).await? {
            Response::Status { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Request daemon shutdown
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        match self.send(Request::Shutdown).await? {
            Response::Ok | Response::ShuttingDown => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Send a launch, exec, stop, start or down request
    pub async fn submit(&self, request: Request) -> Result<Submission, ClientError> {
        match self.send(request).await? {
            Response::Submitted { ticket } => Ok(Submission::Ticket(ticket)),
            Response::Launched { result } => Ok(Submission::Launched(result)),
            Response::Finished { result } => Ok(Submission::Finished(result)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn launch(
        &self,
        cluster: &str,
        task: Task,
        options: LaunchOptions,
        detach: bool,
    ) -> Result<Submission, ClientError> {
        self.submit(Request::Launch {
            cluster: cluster.to_string(),
            task,
            options,
            detach,
        })
        .await
    }

    pub async fn exec(&self, cluster: &str, task: Task, detach: bool) -> Result<Submission, ClientError> {
        self.submit(Request::Exec {
            cluster: cluster.to_string(),
            task,
            detach,
        })
        .await
    }

    pub async fn cluster_status(
        &self,
        cluster: Option<&str>,
        refresh: bool,
    ) -> Result<Vec<ClusterRecord>, ClientError> {
        match self
            .send(Request::ClusterStatus {
                cluster: cluster.map(str::to_string),
                refresh,
            })
            .await?
        {
            Response::Clusters { clusters } => Ok(clusters),
            other => Err(unexpected(other)),
        }
    }

    pub async fn logs(
        &self,
        cluster: &str,
        selectors: Vec<JobSelector>,
        sync_down: bool,
    ) -> Result<LogsOutput, ClientError> {
        match self
            .send(Request::Logs {
                cluster: cluster.to_string(),
                selectors,
                sync_down,
            })
            .await?
        {
            Response::Logs { output } => Ok(output),
            other => Err(unexpected(other)),
        }
    }

    pub async fn queue(&self, cluster: &str) -> Result<Vec<Job>, ClientError> {
        match self
            .send(Request::Queue {
                cluster: cluster.to_string(),
            })
            .await?
        {
            Response::Queue { jobs } => Ok(jobs),
            other => Err(unexpected(other)),
        }
    }

    pub async fn cancel_job(&self, cluster: &str, job_id: JobId) -> Result<JobStatus, ClientError> {
        match self
            .send(Request::CancelJob {
                cluster: cluster.to_string(),
                job_id,
            })
            .await?
        {
            Response::JobCancelled { status, .. } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn cancel_request(&self, request_id: &str) -> Result<CancelOutcome, ClientError> {
        match self
            .send(Request::CancelRequest {
                request_id: request_id.to_string(),
            })
            .await?
        {
            Response::RequestCancelled { outcome } => Ok(outcome),
            other => Err(unexpected(other)),
        }
    }

    /// One request, or every request when `request_id` is `None`
    pub async fn requests(&self, request_id: Option<&str>) -> Result<Vec<RequestRecord>, ClientError> {
        match self
            .send(Request::RequestStatus {
                request_id: request_id.map(str::to_string),
            })
            .await?
        {
            Response::Requests { requests } => Ok(requests),
            other => Err(unexpected(other)),
        }
    }

    pub async fn request_logs(
        &self,
        request_id: &str,
        follow: bool,
    ) -> Result<(RequestRecord, Vec<String>), ClientError> {
        match self
            .send(Request::RequestLogs {
                request_id: request_id.to_string(),
                follow,
            })
            .await?
        {
            Response::RequestLogs { request, lines } => Ok((*request, lines)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn show_gpus(&self, context: Option<&str>) -> Result<Vec<ContextGpus>, ClientError> {
        match self
            .send(Request::ShowGpus {
                context: context.map(str::to_string),
            })
            .await?
        {
            Response::Gpus { contexts } => Ok(contexts),
            other => Err(unexpected(other)),
        }
    }
}

/// Start the daemon in the background, returning the child process handle
pub fn start_daemon_background() -> Result<std::process::Child, ClientError> {
    let nbd_path = find_nbd_binary();

    Command::new(&nbd_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| ClientError::DaemonStartFailed(format!("{}: {}", nbd_path.display(), e)))
}

/// Stop the daemon (graceful first, then forceful)
/// Returns true if daemon was stopped, false if it wasn't running
pub async fn daemon_stop(paths: &DaemonPaths) -> Result<bool, ClientError> {
    let client = match DaemonClient::connect(paths) {
        Ok(c) => c,
        Err(ClientError::DaemonNotRunning) => {
            cleanup_stale_pid(paths);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let shutdown_result = client.shutdown().await;

    if let Some(pid) = read_daemon_pid(paths) {
        if shutdown_result.is_ok() {
            wait_for_exit(pid, timeout_exit()).await;
        }

        if process_exists(pid) {
            force_kill_daemon(pid);
            wait_for_exit(pid, timeout_exit()).await;
        }
    }

    cleanup_stale_pid(paths);
    // A killed daemon leaves its socket behind
    if paths.socket_path.exists() {
        let _ = std::fs::remove_file(&paths.socket_path);
    }

    Ok(true)
}

/// Wait for a process to exit
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !process_exists(pid) {
            return true;
        }
        tokio::time::sleep(poll_interval()).await;
    }
    false
}

/// Find the nbd binary
pub fn find_nbd_binary() -> PathBuf {
    // Explicit override (used by tests to ensure correct binary)
    if let Ok(path) = std::env::var("NB_DAEMON_BINARY") {
        return PathBuf::from(path);
    }

    // Running from cargo (development)
    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let dev_path = PathBuf::from(manifest_dir)
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.join("target/debug/nbd"));
        if let Some(path) = dev_path {
            if path.exists() {
                return path;
            }
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("nbd");
            if sibling.exists() {
                return sibling;
            }
        }
    }

    PathBuf::from("nbd")
}

/// Clean up orphaned PID file
fn cleanup_stale_pid(paths: &DaemonPaths) {
    if paths.lock_path.exists() {
        let _ = std::fs::remove_file(&paths.lock_path);
    }
}

/// Get the PID from the daemon PID file, if it exists
pub fn read_daemon_pid(paths: &DaemonPaths) -> Option<u32> {
    std::fs::read_to_string(&paths.lock_path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok())
}

/// Check if a process with the given PID exists
pub fn process_exists(pid: u32) -> bool {
    // kill -0 checks existence without sending a signal
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Force kill a daemon process
pub fn force_kill_daemon(pid: u32) -> bool {
    Command::new("kill")
        .args(["-9", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Read daemon log from the last startup marker, looking for errors
pub fn read_startup_error(paths: &DaemonPaths) -> Option<String> {
    let content = std::fs::read_to_string(&paths.log_path).ok()?;
    startup_error_in(&content)
}

fn startup_error_in(content: &str) -> Option<String> {
    let start_pos = content.rfind(STARTUP_MARKER_PREFIX)?;
    let startup_log = &content[start_pos..];

    let errors: Vec<&str> = startup_log
        .lines()
        .filter(|line| line.contains(" ERROR ") || line.contains("Failed to start"))
        .collect();

    if errors.is_empty() {
        return None;
    }

    // Format: "timestamp LEVEL target: message"
    let error_messages: Vec<String> = errors
        .iter()
        .filter_map(|line| line.split_once(": ").map(|(_, msg)| msg.to_string()))
        .collect();

    if error_messages.is_empty() {
        Some(errors.join("\n"))
    } else {
        Some(error_messages.join("\n"))
    }
}

/// Wrap an error with startup log info if available
fn wrap_with_startup_error(err: ClientError, paths: &DaemonPaths) -> ClientError {
    if matches!(err, ClientError::DaemonStartFailed(_)) {
        return err;
    }

    match read_startup_error(paths) {
        Some(startup_error) => ClientError::DaemonStartFailed(startup_error),
        None => err,
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
