// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # SSH Transport Seam
//!
//! Traits the connection pool and command executor program against. The
//! production implementation lives in `crate::infrastructure::ssh` (russh);
//! tests plug in scripted fakes.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** SSH connect / exec abstraction

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::host::HostId;

/// Everything needed to open one authenticated session.
///
/// Key material is held only for the duration of the connect call.
#[derive(Clone)]
pub struct SshTarget {
    pub host_id: HostId,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub private_key_pem: String,
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host_id", &self.host_id)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A piece of output from a streaming command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Stdout(String),
    Stderr(String),
    /// The remote side closed the stream.
    Closed { exit_code: Option<i32> },
}

#[derive(Debug, Error)]
pub enum SshError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("authentication rejected for user '{0}'")]
    AuthRejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("channel error: {0}")]
    Channel(String),
}

/// One live, authenticated SSH session.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run `command` to completion, writing `stdin` (if any) and closing it.
    async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput, SshError>;

    /// Run a long-lived command, pushing output chunks until it exits or the
    /// receiver is dropped.
    async fn exec_streaming(
        &self,
        command: &str,
        sink: mpsc::UnboundedSender<StreamChunk>,
    ) -> Result<(), SshError>;

    /// False once the transport reported a disconnect.
    fn is_connected(&self) -> bool;

    async fn close(&self);
}

#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn RemoteSession>, SshError>;
}
