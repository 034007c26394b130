// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! russh-backed implementation of the SSH transport seam.
//!
//! Authentication is key-based only. Server host keys are accepted without a
//! known_hosts check; the key algorithm is logged at debug level.

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::{decode_secret_key, PrivateKeyWithHashAlg};
use russh::{ChannelMsg, Disconnect};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::host::HostId;
use crate::domain::ssh::{ExecOutput, RemoteSession, SshConnector, SshError, SshTarget, StreamChunk};

/// Client event handler. Flips the shared `connected` flag when the transport
/// drops so the pool rebuilds the session on next acquire.
struct ClientHandler {
    host_id: HostId,
    connected: Arc<AtomicBool>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host_id = %self.host_id,
            algorithm = server_public_key.algorithm().as_str(),
            "Accepting server host key"
        );
        Ok(true)
    }

    async fn disconnected(
        &mut self,
        reason: client::DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::SeqCst);
        match reason {
            client::DisconnectReason::ReceivedDisconnect(_) => {
                debug!(host_id = %self.host_id, "Server closed SSH session");
            }
            client::DisconnectReason::Error(e) => {
                warn!(host_id = %self.host_id, error = %e, "SSH transport disconnected");
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct RusshConnector {
    config: Arc<client::Config>,
}

impl RusshConnector {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn RemoteSession>, SshError> {
        let key = decode_secret_key(&target.private_key_pem, target.passphrase.as_deref())
            .map_err(|e| SshError::InvalidKey(e.to_string()))?;

        let connected = Arc::new(AtomicBool::new(true));
        let handler = ClientHandler {
            host_id: target.host_id.clone(),
            connected: connected.clone(),
        };

        let mut handle = client::connect(
            self.config.clone(),
            (target.hostname.as_str(), target.port),
            handler,
        )
        .await
        .map_err(|e| SshError::Transport(e.to_string()))?;

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| SshError::Transport(e.to_string()))?
            .flatten();

        let auth = handle
            .authenticate_publickey(
                target.username.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await
            .map_err(|e| SshError::Transport(e.to_string()))?;

        if !auth.success() {
            return Err(SshError::AuthRejected(target.username.clone()));
        }

        debug!(host_id = %target.host_id, hostname = %target.hostname, "SSH session established");

        Ok(Arc::new(RusshSession {
            host_id: target.host_id.clone(),
            handle,
            connected,
        }))
    }
}

pub struct RusshSession {
    host_id: HostId,
    handle: Handle<ClientHandler>,
    connected: Arc<AtomicBool>,
}

impl RusshSession {
    fn ensure_open(&self) -> Result<(), SshError> {
        if !self.is_connected() {
            return Err(SshError::SessionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput, SshError> {
        self.ensure_open()?;

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        if let Some(input) = stdin {
            channel
                .data(input)
                .await
                .map_err(|e| SshError::Channel(e.to_string()))?;
        }
        channel
            .eof()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                _ => {}
            }
        }

        // Channel closed without an exit status: the command never finished.
        let exit_code = exit_code.ok_or_else(|| {
            SshError::Channel("channel closed without exit status".to_string())
        })?;

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn exec_streaming(
        &self,
        command: &str,
        sink: mpsc::UnboundedSender<StreamChunk>,
    ) -> Result<(), SshError> {
        self.ensure_open()?;

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            let chunk = match msg {
                ChannelMsg::Data { ref data } => {
                    StreamChunk::Stdout(String::from_utf8_lossy(data).into_owned())
                }
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    StreamChunk::Stderr(String::from_utf8_lossy(data).into_owned())
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status as i32);
                    continue;
                }
                _ => continue,
            };
            if sink.send(chunk).is_err() {
                debug!(host_id = %self.host_id, "Log stream receiver dropped");
                let _ = channel.close().await;
                return Ok(());
            }
        }

        let _ = sink.send(StreamChunk::Closed { exit_code });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.handle.is_closed()
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "closed by control plane", "en")
            .await
        {
            debug!(host_id = %self.host_id, error = %e, "Error during SSH disconnect");
        }
    }
}
