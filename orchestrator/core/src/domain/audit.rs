// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! Append-only audit records for remote command attempts and swarm control
//! actions. Entries are never mutated once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::host::HostId;
use crate::domain::swarm::SwarmId;

/// Record of one remote command attempt, written whether or not the command
/// ran to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAuditLogEntry {
    pub id: Uuid,
    pub host_id: HostId,
    pub command: String,
    pub executed_by: String,
    /// `None` when the command never produced an exit status (transport failure).
    pub exit_code: Option<i32>,
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl CommandAuditLogEntry {
    pub fn completed(
        host_id: HostId,
        command: impl Into<String>,
        executed_by: impl Into<String>,
        exit_code: i32,
        output: impl Into<String>,
        stderr: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let stderr = stderr.into();
        Self {
            id: Uuid::new_v4(),
            host_id,
            command: command.into(),
            executed_by: executed_by.into(),
            exit_code: Some(exit_code),
            output: output.into(),
            error: if stderr.is_empty() { None } else { Some(stderr) },
            duration_ms,
            success: exit_code == 0,
            timestamp: Utc::now(),
        }
    }

    pub fn transport_failure(
        host_id: HostId,
        command: impl Into<String>,
        executed_by: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            host_id,
            command: command.into(),
            executed_by: executed_by.into(),
            exit_code: None,
            output: String::new(),
            error: Some(error.into()),
            duration_ms,
            success: false,
            timestamp: Utc::now(),
        }
    }
}

/// Record of a control action accepted for a swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlAuditEntry {
    pub id: Uuid,
    pub swarm_id: SwarmId,
    pub action: String,
    pub executed_by: String,
    pub parameters: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ControlAuditEntry {
    pub fn new(
        swarm_id: SwarmId,
        action: impl Into<String>,
        executed_by: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            swarm_id,
            action: action.into(),
            executed_by: executed_by.into(),
            parameters,
            timestamp: Utc::now(),
        }
    }
}
