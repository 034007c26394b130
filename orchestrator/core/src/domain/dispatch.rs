// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! Delivery seam between accepted control actions and the swarms they target,
//! plus the keyed read cache control actions invalidate.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::control::ControlCommand;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch queue closed")]
    QueueClosed,

    #[error("dispatch failed: {0}")]
    Failed(String),
}

/// Delivers a [`ControlCommand`] to wherever it is executed (in-process queue,
/// webhook, message broker).
#[async_trait]
pub trait ControlDispatcher: Send + Sync {
    async fn dispatch(&self, command: ControlCommand) -> Result<(), DispatchError>;
}

/// Keyed, expiring cache of serialized read models.
pub trait ReadCache: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration);
    fn invalidate(&self, key: &str);
}
