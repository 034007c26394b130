// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # Remote Command Executor
//!
//! Runs whitelisted commands on hosts over pooled SSH sessions.
//!
//! ## Execution flow
//!
//! 1. Resolve the command name against the whitelist (`NotWhitelisted`) and
//!    require input for commands that write stdin to disk (`MissingInput`).
//! 2. Load the host (`HostNotFound`) and pick the line for its OS (`NoCommandForOs`).
//! 3. Check out the host's pooled session, run the line, release the session.
//! 4. Write an audit row for every attempt that got past step 2.
//!
//! Steps 1 and 2 never touch the pool. A non-zero remote exit status is a
//! normal result with `success: false`; only transport failures are errors.
//! Operator input is written to the remote process's stdin and never becomes
//! part of a command line.
//!
//! Log streaming uses a dedicated session so a long-running follow never holds
//! the host's pooled slot. The stream ends when its handle is cancelled, when
//! the host is closed in the pool, or when the pool shuts down.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Whitelisted remote execution with audit trail

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::connection_pool::{ConnectionPool, PoolError};
use crate::domain::audit::CommandAuditLogEntry;
use crate::domain::command::{follow_logs_command, CommandOutput, CommandType};
use crate::domain::errors::ErrorKind;
use crate::domain::events::FleetEvent;
use crate::domain::host::{Host, HostId, OsType};
use crate::domain::repository::{AuditLogRepository, HostRepository, RepositoryError};
use crate::domain::ssh::StreamChunk;
use crate::infrastructure::event_bus::EventBus;

pub const DEFAULT_EXECUTED_BY: &str = "system";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{0}' is not whitelisted")]
    NotWhitelisted(String),

    #[error("host '{0}' not found")]
    HostNotFound(HostId),

    #[error("command '{command}' has no implementation for {os}")]
    NoCommandForOs { command: String, os: &'static str },

    #[error("command '{0}' requires input")]
    MissingInput(String),

    #[error(transparent)]
    Connection(#[from] PoolError),

    #[error("execution on host '{host_id}' failed: {reason}")]
    ExecFailed { host_id: HostId, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::NotWhitelisted(_)
            | CommandError::NoCommandForOs { .. }
            | CommandError::MissingInput(_) => ErrorKind::InvalidInput,
            CommandError::HostNotFound(_) => ErrorKind::NotFound,
            CommandError::Connection(e) => e.kind(),
            CommandError::ExecFailed { .. } => ErrorKind::ConnectionFailure,
            CommandError::Repository(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Written to the remote command's stdin for commands that read it.
    pub input: Option<String>,
    /// Recorded in the audit trail; defaults to `"system"`.
    pub executed_by: Option<String>,
}

/// Handle to a running log stream.
pub struct LogStreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LogStreamHandle {
    /// Stop streaming and force-close the stream's SSH session.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the stream has ended and its session is closed.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Log stream task failed: {}", e);
        }
    }
}

pub struct CommandExecutor {
    hosts: Arc<dyn HostRepository>,
    pool: Arc<ConnectionPool>,
    audit: Arc<dyn AuditLogRepository>,
    event_bus: EventBus,
}

impl CommandExecutor {
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        pool: Arc<ConnectionPool>,
        audit: Arc<dyn AuditLogRepository>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            hosts,
            pool,
            audit,
            event_bus,
        }
    }

    pub async fn execute(
        &self,
        host_id: &HostId,
        command_name: &str,
        options: ExecuteOptions,
    ) -> Result<CommandOutput, CommandError> {
        let command: CommandType = command_name
            .parse()
            .map_err(|_| CommandError::NotWhitelisted(command_name.to_string()))?;

        // An empty stdin would truncate the target file.
        if command.accepts_input() && options.input.is_none() {
            return Err(CommandError::MissingInput(command.as_str().to_string()));
        }

        let host = self.load_host(host_id).await?;
        let line = resolve_line(command, host.os_type)?;

        let executed_by = options
            .executed_by
            .unwrap_or_else(|| DEFAULT_EXECUTED_BY.to_string());

        let stdin = match options.input {
            Some(input) if command.accepts_input() => Some(input.into_bytes()),
            Some(_) => {
                warn!(command = %command, "Ignoring input for command that does not read stdin");
                None
            }
            None => None,
        };

        debug!(
            host_id = %host_id,
            command = %command,
            executed_by = %executed_by,
            "Executing remote command"
        );

        let started = Instant::now();
        let attempt = self.run(host_id, line, stdin.as_deref()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match attempt {
            Ok(output) => {
                let entry = CommandAuditLogEntry::completed(
                    host_id.clone(),
                    command.as_str(),
                    executed_by,
                    output.exit_code,
                    output.stdout.clone(),
                    output.stderr.clone(),
                    duration_ms,
                );
                self.write_audit(&entry).await;

                let success = output.exit_code == 0;
                let outcome = if success { "success" } else { "nonzero_exit" };
                metrics::counter!(
                    "qiflow_commands_total",
                    "command" => command.as_str(),
                    "outcome" => outcome
                )
                .increment(1);
                self.publish(host_id, command, success, Some(output.exit_code), duration_ms);

                info!(
                    host_id = %host_id,
                    command = %command,
                    exit_code = output.exit_code,
                    duration_ms,
                    "Remote command finished"
                );

                Ok(CommandOutput {
                    success,
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration_ms,
                })
            }
            Err(err) => {
                let entry = CommandAuditLogEntry::transport_failure(
                    host_id.clone(),
                    command.as_str(),
                    executed_by,
                    err.to_string(),
                    duration_ms,
                );
                self.write_audit(&entry).await;

                metrics::counter!(
                    "qiflow_commands_total",
                    "command" => command.as_str(),
                    "outcome" => "error"
                )
                .increment(1);
                self.publish(host_id, command, false, None, duration_ms);

                warn!(
                    host_id = %host_id,
                    command = %command,
                    error = %err,
                    "Remote command failed"
                );
                Err(err)
            }
        }
    }

    /// Follow the swarm log on a host. `on_data` receives stdout/stderr chunks
    /// in arrival order and must not block. `on_error` is called at most once
    /// if the stream fails after it started.
    pub async fn stream_logs<D, E>(
        &self,
        host_id: &HostId,
        mut on_data: D,
        on_error: E,
    ) -> Result<LogStreamHandle, CommandError>
    where
        D: FnMut(StreamChunk) + Send + 'static,
        E: FnOnce(CommandError) + Send + 'static,
    {
        let host = self.load_host(host_id).await?;
        let line = follow_logs_command(host.os_type);
        let session = self.pool.open_dedicated(host_id).await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = self.pool.dedicated_token(host_id);

        let stream_session = session.clone();
        let mut exec_task =
            tokio::spawn(async move { stream_session.exec_streaming(&line, tx).await });

        let token = cancel.clone();
        let stream_host = host_id.clone();
        let task = tokio::spawn(async move {
            let mut cancelled = false;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    chunk = rx.recv() => match chunk {
                        Some(StreamChunk::Closed { exit_code }) => {
                            debug!(
                                host_id = %stream_host,
                                ?exit_code,
                                "Log stream closed by remote"
                            );
                            break;
                        }
                        Some(chunk) => on_data(chunk),
                        None => break,
                    }
                }
            }

            if cancelled {
                exec_task.abort();
            } else {
                match (&mut exec_task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => on_error(CommandError::ExecFailed {
                        host_id: stream_host.clone(),
                        reason: e.to_string(),
                    }),
                    Err(e) => on_error(CommandError::ExecFailed {
                        host_id: stream_host.clone(),
                        reason: e.to_string(),
                    }),
                }
            }

            session.close().await;
            info!(host_id = %stream_host, cancelled, "Log stream ended");
        });

        Ok(LogStreamHandle { cancel, task })
    }

    async fn load_host(&self, host_id: &HostId) -> Result<Host, CommandError> {
        self.hosts
            .find_by_id(host_id)
            .await?
            .ok_or_else(|| CommandError::HostNotFound(host_id.clone()))
    }

    async fn run(
        &self,
        host_id: &HostId,
        line: &str,
        stdin: Option<&[u8]>,
    ) -> Result<crate::domain::ssh::ExecOutput, CommandError> {
        let pooled = self.pool.acquire(host_id).await?;
        let result = pooled.session().exec(line, stdin).await;
        pooled.release();
        result.map_err(|e| CommandError::ExecFailed {
            host_id: host_id.clone(),
            reason: e.to_string(),
        })
    }

    async fn write_audit(&self, entry: &CommandAuditLogEntry) {
        if let Err(e) = self.audit.create_audit_log(entry).await {
            warn!(
                host_id = %entry.host_id,
                command = %entry.command,
                error = %e,
                "Failed to write command audit log"
            );
        }
    }

    fn publish(
        &self,
        host_id: &HostId,
        command: CommandType,
        success: bool,
        exit_code: Option<i32>,
        duration_ms: u64,
    ) {
        self.event_bus.publish(FleetEvent::CommandExecuted {
            host_id: host_id.clone(),
            command: command.as_str().to_string(),
            success,
            exit_code,
            duration_ms,
            executed_at: Utc::now(),
        });
    }
}

fn resolve_line(command: CommandType, os: OsType) -> Result<&'static str, CommandError> {
    command
        .command_for(os)
        .ok_or_else(|| CommandError::NoCommandForOs {
            command: command.as_str().to_string(),
            os: os.as_str(),
        })
}
