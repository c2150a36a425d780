// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! The listener runs in a spawned task, accepting connections and
//! handling them without blocking the engine. Requests map onto the
//! supervisor's query surface; a malformed request or an unknown method
//! answers with an error and never takes the daemon down.

use crate::lifecycle::DaemonState;
use clier_core::Config;
use clier_engine::{ProcessInfo, WorkflowStatus};
use clier_wire::{
    read_request, write_response, HealthSummary, ProcessEntry, ProtocolError, Request, Response,
    StepEntry, WorkflowStatusEntry, PROTOCOL_VERSION,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Shared daemon context for all request handlers.
pub struct ListenCtx {
    pub state: Arc<DaemonState>,
    pub shutdown: Arc<Notify>,
}

/// Accepts socket connections and serves the request catalog.
pub struct Listener {
    unix: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { unix, ctx }
    }

    /// Run the accept loop until the daemon exits.
    pub async fn run(self) {
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        let (reader, writer) = stream.into_split();
                        if let Err(e) = handle_connection(reader, writer, &ctx).await {
                            log_connection_error(e);
                        }
                    });
                }
                Err(e) => error!("accept error: {}", e),
            }
        }
    }
}

fn log_connection_error(e: ProtocolError) {
    match e {
        // EOF on a closed connection is the normal end of a session.
        ProtocolError::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!("connection closed");
        }
        other => warn!("connection error: {}", other),
    }
}

/// Serve one connection: a sequence of request/response frames.
pub(crate) async fn handle_connection<R, W>(
    mut reader: R,
    mut writer: W,
    ctx: &Arc<ListenCtx>,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let request = match read_request(&mut reader).await {
            Ok(request) => request,
            Err(ProtocolError::Json(e)) => {
                // Malformed request: report and keep the connection.
                write_response(
                    &mut writer,
                    &Response::Error {
                        message: format!("malformed request: {e}"),
                    },
                )
                .await?;
                continue;
            }
            Err(other) => return Err(other),
        };

        let is_shutdown = matches!(request, Request::Shutdown);
        let response = dispatch(request, ctx).await;
        write_response(&mut writer, &response).await?;
        if is_shutdown {
            ctx.shutdown.notify_one();
            return Ok(());
        }
    }
}

async fn dispatch(request: Request, ctx: &Arc<ListenCtx>) -> Response {
    let supervisor = &ctx.state.supervisor;
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version } => {
            if version == PROTOCOL_VERSION {
                Response::Hello {
                    version: PROTOCOL_VERSION,
                }
            } else {
                Response::Error {
                    message: format!(
                        "protocol mismatch: client {version}, daemon {PROTOCOL_VERSION}"
                    ),
                }
            }
        }

        Request::Status => Response::Status {
            pid: std::process::id(),
            uptime_ms: ctx.state.start_time.elapsed().as_millis() as u64,
            process_count: supervisor.process_count(),
            config_path: ctx.state.config_path.clone(),
        },

        Request::Health => {
            let checks = supervisor.health();
            Response::Health {
                health: HealthSummary {
                    pid: std::process::id(),
                    uptime_ms: ctx.state.start_time.elapsed().as_millis() as u64,
                    process_count: supervisor.process_count(),
                    memory_rss_bytes: ctx.state.memory_rss_bytes(),
                    process_manager: checks.process_manager,
                    event_handler: checks.event_handler,
                    orchestrator: checks.orchestrator,
                },
            }
        }

        Request::ProcessList => Response::Processes {
            processes: supervisor
                .list_processes()
                .into_iter()
                .map(process_entry)
                .collect(),
        },

        Request::ProcessStop { name, force } => {
            match supervisor.process_stop(&name, force).await {
                Ok(()) => {
                    ctx.state.save_state();
                    Response::Ok
                }
                Err(e) => error_response(e),
            }
        }

        Request::ProcessRestart { name, force } => {
            match supervisor.process_restart(&name, force).await {
                Ok(()) => Response::Ok,
                Err(e) => error_response(e),
            }
        }

        Request::ProcessAdd { config } => match supervisor.process_add(config) {
            Ok(()) => {
                ctx.state.save_state();
                Response::Ok
            }
            Err(e) => error_response(e),
        },

        Request::ProcessDelete { name } => match supervisor.process_delete(&name).await {
            Ok(()) => {
                ctx.state.save_state();
                Response::Ok
            }
            Err(e) => error_response(e),
        },

        Request::LogsQuery {
            name,
            lines,
            since_ms,
        } => Response::Logs {
            entries: supervisor.logs_query(&name, lines, since_ms),
        },

        Request::LogsClear { name } => Response::Cleared {
            cleared: supervisor.logs_clear(name.as_deref()),
        },

        Request::EventsQuery {
            process_name,
            event_type,
            name,
            lines,
            since_ms,
        } => Response::Events {
            events: supervisor.events_query(
                process_name.as_deref(),
                event_type.as_deref(),
                name.as_deref(),
                since_ms,
                lines,
            ),
        },

        Request::ConfigReload { config_path } => {
            match Config::from_json_file(&config_path) {
                Ok(config) => match supervisor.reload(config) {
                    Ok(()) => Response::Ok,
                    Err(e) => error_response(e),
                },
                Err(e) => error_response(e),
            }
        }

        Request::WorkflowStart { name } => match supervisor.workflow_start(&name) {
            Ok(()) => Response::Ok,
            Err(e) => error_response(e),
        },

        Request::WorkflowCancel { name } => match supervisor.workflow_cancel(&name) {
            Ok(()) => Response::Ok,
            Err(e) => error_response(e),
        },

        Request::WorkflowList => Response::Workflows {
            names: supervisor.workflow_names(),
        },

        Request::WorkflowStatus { name } => match name {
            Some(name) => Response::Workflow {
                workflow: supervisor
                    .workflow_status(&name)
                    .map(|s| Box::new(workflow_entry(s))),
            },
            None => Response::WorkflowStatuses {
                workflows: supervisor
                    .workflow_statuses()
                    .into_iter()
                    .map(workflow_entry)
                    .collect(),
            },
        },

        Request::StagesMap => Response::Stages {
            stages: supervisor.stages_map(),
        },

        Request::Shutdown => Response::ShuttingDown,
    }
}

fn error_response(e: impl std::fmt::Display) -> Response {
    Response::Error {
        message: e.to_string(),
    }
}

fn process_entry(info: ProcessInfo) -> ProcessEntry {
    ProcessEntry {
        name: info.name,
        kind: info.kind,
        status: info.status,
        pid: info.pid,
        started_at_ms: info.started_at_ms,
        restarts: info.restarts,
    }
}

fn workflow_entry(status: WorkflowStatus) -> WorkflowStatusEntry {
    WorkflowStatusEntry {
        name: status.name,
        status: status.state.as_str().to_string(),
        current_step: status.current_step,
        steps: status
            .steps
            .into_iter()
            .map(|s| StepEntry {
                action: s.action,
                status: s.state.as_str().to_string(),
                started_at_ms: s.started_at_ms,
                completed_at_ms: s.completed_at_ms,
                error: s.error,
            })
            .collect(),
        started_at_ms: status.started_at_ms,
        completed_at_ms: status.completed_at_ms,
        error: status.error,
        triggered_by: status.triggered_by,
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
