// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol between `nb` and `nbd`
//!
//! Every message is a 4-byte big-endian length followed by a JSON body.
//! A connection carries one request and one response.

use std::time::Duration;

use nb_core::{Inventory, Job, JobId, JobStatus, RequestResult, Task};
use nb_engine::{
    CancelOutcome, ClusterRecord, JobSelector, LaunchOptions, LaunchResult, LogsOutput,
    RequestTicket,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Version reported in the `Hello` handshake
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Timeout for reading a request or writing a response
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest accepted message body
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Requests from the CLI to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,

    Hello { version: String },

    /// Daemon health and counters
    Status,

    Shutdown,

    /// Bring a cluster up and run a task on it
    ///
    /// With `detach` the response is a ticket; otherwise the daemon answers
    /// once the job is terminal.
    Launch {
        cluster: String,
        task: Task,
        #[serde(default)]
        options: LaunchOptions,
        #[serde(default)]
        detach: bool,
    },

    Exec {
        cluster: String,
        task: Task,
        #[serde(default)]
        detach: bool,
    },

    ClusterStatus {
        #[serde(default)]
        cluster: Option<String>,
        #[serde(default)]
        refresh: bool,
    },

    Stop {
        cluster: String,
        #[serde(default)]
        detach: bool,
    },

    Start {
        cluster: String,
        #[serde(default)]
        detach: bool,
    },

    Down {
        cluster: String,
        #[serde(default)]
        detach: bool,
    },

    Logs {
        cluster: String,
        selectors: Vec<JobSelector>,
        #[serde(default)]
        sync_down: bool,
    },

    Queue { cluster: String },

    CancelJob { cluster: String, job_id: JobId },

    CancelRequest { request_id: String },

    /// One request by id (or unique prefix), or all when `None`
    RequestStatus {
        #[serde(default)]
        request_id: Option<String>,
    },

    RequestLogs {
        request_id: String,
        /// Answer only once the request is terminal
        #[serde(default)]
        follow: bool,
    },

    ShowGpus {
        #[serde(default)]
        context: Option<String>,
    },
}

impl Request {
    /// Whether the daemon may hold the connection open until work finishes
    pub fn is_long_running(&self) -> bool {
        match self {
            Request::Launch { detach, .. }
            | Request::Exec { detach, .. }
            | Request::Stop { detach, .. }
            | Request::Start { detach, .. }
            | Request::Down { detach, .. } => !detach,
            Request::RequestLogs { follow, .. } => *follow,
            Request::Logs { sync_down, .. } => *sync_down,
            Request::ShowGpus { .. } | Request::ClusterStatus { refresh: true, .. } => true,
            _ => false,
        }
    }
}

/// Daemon counters returned by [`Request::Status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub uptime_secs: u64,
    pub clusters_up: usize,
    pub jobs_active: usize,
    pub requests_inflight: usize,
}

/// Free accelerators on one allowed context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextGpus {
    pub context: String,
    #[serde(default)]
    pub available: Option<Inventory>,
    /// Why the inventory could not be read
    #[serde(default)]
    pub error: Option<String>,
}

/// Responses from the daemon to the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Ok,

    Pong,

    Hello { version: String },

    ShuttingDown,

    Status { status: DaemonStatus },

    Error { message: String },

    /// A detached request was accepted
    Submitted { ticket: RequestTicket },

    /// A synchronous launch or exec finished
    Launched { result: LaunchResult },

    /// A synchronous stop, start or down finished
    Finished { result: RequestResult },

    Clusters { clusters: Vec<ClusterRecord> },

    Logs { output: LogsOutput },

    Queue { jobs: Vec<Job> },

    JobCancelled { job_id: JobId, status: JobStatus },

    RequestCancelled { outcome: CancelOutcome },

    Requests { requests: Vec<nb_core::Request> },

    RequestLogs {
        request: Box<nb_core::Request>,
        lines: Vec<String>,
    },

    Gpus { contexts: Vec<ContextGpus> },
}

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a message body (no length prefix)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

/// Deserialize a message body
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read one length-prefixed message
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Write one message with its length prefix
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode a request within `timeout`
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&bytes)
}

/// Encode and write a response within `timeout`
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let data = encode(response)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
