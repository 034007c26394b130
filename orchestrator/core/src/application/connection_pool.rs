// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # SSH Connection Pool
//!
//! Owns at most one reusable SSH session per host.
//!
//! Each host has a slot guarded by a `tokio::sync::Mutex`. [`ConnectionPool::acquire`]
//! locks the slot and hands the owned guard out inside a [`PooledSession`], so
//! a session can never be checked out twice at once. Dropping (or calling
//! [`PooledSession::release`] on) the guard marks the slot idle and stamps its
//! last-used time.
//!
//! Sessions are established lazily on first use and rebuilt when the transport
//! reports a disconnect. Slots are retired on explicit [`ConnectionPool::close`],
//! by the idle sweeper, or on [`ConnectionPool::close_all`]; a waiter that wakes
//! on a retired slot goes back to the map and picks up (or creates) the
//! replacement, so a host never ends up with two live sessions.
//!
//! Dedicated sessions opened with [`ConnectionPool::open_dedicated`] are not
//! pooled, but their owners hold a token from [`ConnectionPool::dedicated_token`]
//! that is cancelled when the host is closed or the pool shuts down.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Per-host SSH session lifecycle

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::PoolConfig;
use crate::domain::errors::ErrorKind;
use crate::domain::host::HostId;
use crate::domain::repository::{HostRepository, RepositoryError};
use crate::domain::ssh::{RemoteSession, SshConnector, SshError, SshTarget};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("host '{0}' not found")]
    HostNotFound(HostId),

    #[error("failed to read private key {path:?} for host '{host_id}': {reason}")]
    KeyReadFailure {
        host_id: HostId,
        path: PathBuf,
        reason: String,
    },

    #[error("authentication failed for host '{host_id}': {reason}")]
    AuthError { host_id: HostId, reason: String },

    #[error("connection to host '{host_id}' timed out after {timeout_secs}s")]
    ConnectTimeout { host_id: HostId, timeout_secs: u64 },

    #[error("connection to host '{host_id}' failed: {reason}")]
    ConnectionFailure { host_id: HostId, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::HostNotFound(_) => ErrorKind::NotFound,
            PoolError::KeyReadFailure { .. } | PoolError::AuthError { .. } => {
                ErrorKind::ConnectionFailure
            }
            PoolError::ConnectTimeout { .. } => ErrorKind::Timeout,
            PoolError::ConnectionFailure { .. } => ErrorKind::ConnectionFailure,
            PoolError::Repository(e) => e.kind(),
        }
    }
}

struct SlotState {
    session: Option<Arc<dyn RemoteSession>>,
    last_used: Instant,
    retired: bool,
}

impl SlotState {
    fn empty() -> Self {
        Self {
            session: None,
            last_used: Instant::now(),
            retired: false,
        }
    }
}

type Slot = Arc<Mutex<SlotState>>;

/// Exclusive checkout of a host's pooled session.
pub struct PooledSession {
    host_id: HostId,
    session: Arc<dyn RemoteSession>,
    guard: OwnedMutexGuard<SlotState>,
}

impl PooledSession {
    pub fn host_id(&self) -> &HostId {
        &self.host_id
    }

    pub fn session(&self) -> &Arc<dyn RemoteSession> {
        &self.session
    }

    /// Return the session to the pool.
    pub fn release(self) {}
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.guard.last_used = Instant::now();
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("host_id", &self.host_id)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of one host slot.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SlotStats {
    pub host_id: HostId,
    pub connected: bool,
    pub in_use: bool,
    pub idle_secs: u64,
}

pub struct ConnectionPool {
    hosts: Arc<dyn HostRepository>,
    connector: Arc<dyn SshConnector>,
    config: PoolConfig,
    slots: DashMap<HostId, Slot>,
    dedicated: DashMap<HostId, CancellationToken>,
    shutdown: CancellationToken,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        connector: Arc<dyn SshConnector>,
        config: PoolConfig,
    ) -> Self {
        Self {
            hosts,
            connector,
            config,
            slots: DashMap::new(),
            dedicated: DashMap::new(),
            shutdown: CancellationToken::new(),
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    /// Check out the host's session, establishing it if needed. Waits while
    /// another caller holds it.
    pub async fn acquire(&self, host_id: &HostId) -> Result<PooledSession, PoolError> {
        loop {
            let slot = self
                .slots
                .entry(host_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(SlotState::empty())))
                .clone();

            let mut guard = slot.lock_owned().await;
            if guard.retired {
                continue;
            }

            let live = guard
                .session
                .as_ref()
                .filter(|s| s.is_connected())
                .cloned();

            let session = match live {
                Some(session) => {
                    debug!(host_id = %host_id, "Reusing pooled SSH session");
                    session
                }
                None => {
                    if let Some(stale) = guard.session.take() {
                        debug!(host_id = %host_id, "Discarding disconnected SSH session");
                        stale.close().await;
                    }
                    let session = self.establish(host_id).await?;
                    guard.session = Some(session.clone());
                    session
                }
            };

            return Ok(PooledSession {
                host_id: host_id.clone(),
                session,
                guard,
            });
        }
    }

    /// Explicit release by host ID is a no-op: sessions are released by
    /// dropping their [`PooledSession`].
    pub fn release(&self, session: PooledSession) {
        session.release();
    }

    /// Open a session outside the pool. The caller owns and closes it.
    pub async fn open_dedicated(
        &self,
        host_id: &HostId,
    ) -> Result<Arc<dyn RemoteSession>, PoolError> {
        self.establish(host_id).await
    }

    /// Token for the owner of a dedicated session on `host_id`. Cancelled by
    /// [`ConnectionPool::close`] for that host and by [`ConnectionPool::close_all`].
    pub fn dedicated_token(&self, host_id: &HostId) -> CancellationToken {
        self.dedicated
            .entry(host_id.clone())
            .or_insert_with(|| self.shutdown.child_token())
            .child_token()
    }

    /// Terminate and evict the host's session. Waits for an in-flight checkout
    /// to be released first. Dedicated sessions on the host are told to stop.
    pub async fn close(&self, host_id: &HostId) {
        if let Some((_, token)) = self.dedicated.remove(host_id) {
            token.cancel();
            debug!(host_id = %host_id, "Cancelled dedicated SSH sessions");
        }

        let slot = self.slots.get(host_id).map(|entry| entry.value().clone());
        let Some(slot) = slot else {
            return;
        };
        self.retire(host_id, slot).await;
        info!(host_id = %host_id, "Closed pooled SSH session");
    }

    async fn retire(&self, host_id: &HostId, slot: Slot) {
        let mut guard = slot.clone().lock_owned().await;
        if let Some(session) = guard.session.take() {
            session.close().await;
        }
        guard.retired = true;
        self.slots.remove_if(host_id, |_, current| Arc::ptr_eq(current, &slot));
    }

    /// Close sessions idle longer than the idle timeout. Slots currently
    /// checked out are skipped. Returns the number of slots evicted.
    pub async fn sweep_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let candidates: Vec<(HostId, Slot)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut evicted = 0;
        for (host_id, slot) in candidates {
            let Ok(mut guard) = slot.clone().try_lock_owned() else {
                continue;
            };
            if guard.retired {
                continue;
            }
            let idle = guard.last_used.elapsed();
            if guard.session.is_some() && idle <= idle_timeout {
                continue;
            }
            if let Some(session) = guard.session.take() {
                session.close().await;
                debug!(host_id = %host_id, idle_secs = idle.as_secs(), "Evicted idle SSH session");
            }
            guard.retired = true;
            self.slots.remove_if(&host_id, |_, current| Arc::ptr_eq(current, &slot));
            evicted += 1;
        }
        evicted
    }

    /// Start the background idle sweep. Calling this more than once is a no-op.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        let pool: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.sweep_interval();

        *sweeper = Some(tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let Some(pool) = pool.upgrade() else { break };
                        let evicted = pool.sweep_idle().await;
                        if evicted > 0 {
                            info!(evicted, "Connection pool sweep completed");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Connection pool sweeper stopped");
        }));
    }

    /// Stop the sweeper and close every session.
    pub async fn close_all(&self) {
        self.shutdown.cancel();
        self.dedicated.clear();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Connection pool sweeper task failed: {}", e);
            }
        }

        let slots: Vec<(HostId, Slot)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let count = slots.len();
        for (host_id, slot) in slots {
            self.retire(&host_id, slot).await;
        }
        info!(closed = count, "Connection pool shut down");
    }

    pub fn stats(&self) -> Vec<SlotStats> {
        let mut stats: Vec<SlotStats> = self
            .slots
            .iter()
            .map(|entry| match entry.value().try_lock() {
                Ok(state) => SlotStats {
                    host_id: entry.key().clone(),
                    connected: state.session.as_ref().is_some_and(|s| s.is_connected()),
                    in_use: false,
                    idle_secs: state.last_used.elapsed().as_secs(),
                },
                Err(_) => SlotStats {
                    host_id: entry.key().clone(),
                    connected: true,
                    in_use: true,
                    idle_secs: 0,
                },
            })
            .collect();
        stats.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        stats
    }

    async fn establish(&self, host_id: &HostId) -> Result<Arc<dyn RemoteSession>, PoolError> {
        let host = self
            .hosts
            .find_by_id(host_id)
            .await?
            .ok_or_else(|| PoolError::HostNotFound(host_id.clone()))?;

        let key_path = host.auth.private_key_path.clone().ok_or_else(|| PoolError::AuthError {
            host_id: host_id.clone(),
            reason: "no private key configured".to_string(),
        })?;

        let private_key_pem =
            tokio::fs::read_to_string(&key_path)
                .await
                .map_err(|e| PoolError::KeyReadFailure {
                    host_id: host_id.clone(),
                    path: key_path.clone(),
                    reason: e.to_string(),
                })?;

        let passphrase = host
            .auth
            .passphrase_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());

        let target = SshTarget {
            host_id: host_id.clone(),
            hostname: host.hostname.clone(),
            port: host.port,
            username: host.username.clone(),
            private_key_pem,
            passphrase,
        };

        let timeout = self.config.connect_timeout();
        let result = tokio::time::timeout(timeout, self.connector.connect(&target)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "established",
            Ok(Err(_)) => "failed",
            Err(_) => "timeout",
        };
        metrics::counter!("qiflow_ssh_connections_total", "outcome" => outcome).increment(1);

        match result {
            Ok(Ok(session)) => {
                info!(host_id = %host_id, hostname = %host.hostname, "SSH session established");
                Ok(session)
            }
            Ok(Err(SshError::InvalidKey(reason))) => Err(PoolError::KeyReadFailure {
                host_id: host_id.clone(),
                path: key_path,
                reason,
            }),
            Ok(Err(SshError::AuthRejected(user))) => Err(PoolError::AuthError {
                host_id: host_id.clone(),
                reason: format!("server rejected key for user '{}'", user),
            }),
            Ok(Err(e)) => Err(PoolError::ConnectionFailure {
                host_id: host_id.clone(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    host_id = %host_id,
                    timeout_secs = timeout.as_secs(),
                    "SSH connect timed out"
                );
                Err(PoolError::ConnectTimeout {
                    host_id: host_id.clone(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }
}
