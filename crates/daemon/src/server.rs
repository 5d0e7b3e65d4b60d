// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.

use std::time::Instant;

use nb_adapters::{Backend, ContextProbe};
use nb_core::{Clock, IdGen};
use nb_daemon::protocol::{
    self, ContextGpus, DaemonStatus, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION,
};
use nb_engine::{EngineError, Runtime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Everything a connection task needs; cheap to clone
#[derive(Clone)]
pub struct ServerContext<B, P, C, G> {
    runtime: Runtime<B, P, C, G>,
    start_time: Instant,
    shutdown: CancellationToken,
}

impl<B, P, C, G> ServerContext<B, P, C, G>
where
    B: Backend,
    P: ContextProbe,
    C: Clock,
    G: IdGen,
{
    pub fn new(runtime: Runtime<B, P, C, G>, start_time: Instant, shutdown: CancellationToken) -> Self {
        Self {
            runtime,
            start_time,
            shutdown,
        }
    }

    /// Handle a single client connection
    pub async fn handle_connection<S>(&self, stream: S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let request = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
            Ok(req) => req,
            Err(protocol::ProtocolError::Timeout) => {
                error!("Request read timeout");
                return Err(ServerError::Timeout);
            }
            Err(protocol::ProtocolError::ConnectionClosed) => {
                debug!("Client disconnected before sending request");
                return Ok(());
            }
            Err(e) => {
                error!("Failed to read request: {}", e);
                return Err(ServerError::Protocol(e));
            }
        };

        debug!("Received request: {:?}", request);
        let response = self.handle_request(request).await;
        debug!("Sending response: {:?}", response);

        protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT)
            .await
            .map_err(ServerError::Protocol)?;

        Ok(())
    }

    /// Handle a single request and return a response
    pub async fn handle_request(&self, request: Request) -> Response {
        let rt = &self.runtime;
        match request {
            Request::Ping => Response::Pong,

            Request::Hello { version: _ } => Response::Hello {
                version: PROTOCOL_VERSION.to_string(),
            },

            Request::Shutdown => {
                self.shutdown.cancel();
                Response::ShuttingDown
            }

            Request::Status => reply(self.status().await, |status| Response::Status { status }),

            Request::Launch {
                cluster,
                task,
                options,
                detach: true,
            } => reply(rt.launch_async(&cluster, task, options), submitted),
            Request::Launch {
                cluster,
                task,
                options,
                detach: false,
            } => reply(rt.launch(&cluster, task, options).await, |result| {
                Response::Launched { result }
            }),

            Request::Exec {
                cluster,
                task,
                detach: true,
            } => reply(rt.exec_async(&cluster, task), submitted),
            Request::Exec {
                cluster,
                task,
                detach: false,
            } => reply(rt.exec(&cluster, task).await, |result| Response::Launched {
                result,
            }),

            Request::ClusterStatus { cluster, refresh } => {
                reply(rt.status(cluster.as_deref(), refresh).await, |clusters| {
                    Response::Clusters { clusters }
                })
            }

            Request::Stop { cluster, detach } => match detach {
                true => reply(rt.stop_async(&cluster), submitted),
                false => reply(rt.stop(&cluster).await, finished),
            },
            Request::Start { cluster, detach } => match detach {
                true => reply(rt.start_async(&cluster), submitted),
                false => reply(rt.start(&cluster).await, finished),
            },
            Request::Down { cluster, detach } => match detach {
                true => reply(rt.down_async(&cluster), submitted),
                false => reply(rt.down(&cluster).await, finished),
            },

            Request::Logs {
                cluster,
                selectors,
                sync_down,
            } => reply(rt.logs(&cluster, &selectors, sync_down).await, |output| {
                Response::Logs { output }
            }),

            Request::Queue { cluster } => reply(rt.queue(&cluster), |jobs| Response::Queue { jobs }),

            Request::CancelJob { cluster, job_id } => {
                reply(rt.cancel_job(&cluster, job_id).await, |status| {
                    Response::JobCancelled { job_id, status }
                })
            }

            Request::CancelRequest { request_id } => {
                reply(rt.cancel(&request_id).await, |outcome| {
                    Response::RequestCancelled { outcome }
                })
            }

            Request::RequestStatus { request_id: None } => Response::Requests {
                requests: rt.list_requests(),
            },
            Request::RequestStatus {
                request_id: Some(id),
            } => reply(rt.request(&id), |request| Response::Requests {
                requests: vec![request],
            }),

            Request::RequestLogs { request_id, follow } => {
                reply(self.request_logs(&request_id, follow).await, |(request, lines)| {
                    Response::RequestLogs {
                        request: Box::new(request),
                        lines,
                    }
                })
            }

            Request::ShowGpus { context } => Response::Gpus {
                contexts: self.show_gpus(context).await,
            },
        }
    }

    async fn status(&self) -> Result<DaemonStatus, EngineError> {
        let clusters = self.runtime.status(None, false).await?;
        let requests_inflight = self
            .runtime
            .list_requests()
            .iter()
            .filter(|r| !r.is_terminal())
            .count();
        Ok(DaemonStatus {
            uptime_secs: self.start_time.elapsed().as_secs(),
            clusters_up: clusters.iter().filter(|c| c.cluster.is_up()).count(),
            jobs_active: clusters.iter().map(|c| c.active_jobs).sum(),
            requests_inflight,
        })
    }

    async fn request_logs(
        &self,
        id: &str,
        follow: bool,
    ) -> Result<(nb_core::Request, Vec<String>), EngineError> {
        let request = match follow {
            true => self.runtime.wait_request(id).await?,
            false => self.runtime.request(id)?,
        };
        let lines = self.runtime.request_logs(&request.id.0)?;
        Ok((request, lines))
    }

    async fn show_gpus(&self, context: Option<String>) -> Vec<ContextGpus> {
        let contexts = match context {
            Some(context) => vec![context],
            None => self.runtime.contexts(),
        };
        let mut out = Vec::with_capacity(contexts.len());
        for context in contexts {
            let entry = match self.runtime.available(&context).await {
                Ok(available) => ContextGpus {
                    context,
                    available: Some(available),
                    error: None,
                },
                Err(e) => ContextGpus {
                    context,
                    available: None,
                    error: Some(e.to_string()),
                },
            };
            out.push(entry);
        }
        out
    }
}

fn reply<T>(result: Result<T, EngineError>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

fn submitted(ticket: nb_engine::RequestTicket) -> Response {
    Response::Submitted { ticket }
}

fn finished(result: nb_core::RequestResult) -> Response {
    Response::Finished { result }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Request timeout")]
    Timeout,
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
