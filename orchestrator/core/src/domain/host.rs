// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # Host Aggregate
//!
//! A [`Host`] is a machine reachable over SSH that runs one or more swarms.
//! Hosts are registered by operators, mutated by connection tests and health
//! checks, and deleted only after their pooled SSH session has been closed.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Host identity, OS family and SSH auth material reference

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Operator-assigned host identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Operating system family of a host. Selects which whitelisted command
/// string is sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
}

impl OsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsType::Linux => "linux",
            OsType::Windows => "windows",
        }
    }
}

impl FromStr for OsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(OsType::Linux),
            "windows" => Ok(OsType::Windows),
            other => Err(format!("unknown os type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
    Error,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
            HostStatus::Error => "error",
        }
    }
}

impl FromStr for HostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(HostStatus::Online),
            "offline" => Ok(HostStatus::Offline),
            "error" => Ok(HostStatus::Error),
            other => Err(format!("unknown host status '{}'", other)),
        }
    }
}

/// Reference to the SSH credentials for a host.
///
/// Only a path is stored; key material is read from disk at connect time and
/// never persisted. Hosts without a key path cannot be connected to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    /// Name of the environment variable holding the key passphrase, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_env: Option<String>,
}

impl HostAuth {
    pub fn key(path: impl Into<PathBuf>) -> Self {
        Self {
            private_key_path: Some(path.into()),
            passphrase_env: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub host_id: HostId,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub os_type: OsType,
    pub auth: HostAuth,
    pub capacity_max_swarms: u32,
    pub current_swarms: u32,
    pub status: HostStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration payload for a new host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHost {
    pub host_id: HostId,
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub os_type: OsType,
    #[serde(default)]
    pub auth: HostAuth,
    #[serde(default = "default_capacity")]
    pub capacity_max_swarms: u32,
}

impl Host {
    pub fn register(new: NewHost) -> Self {
        let now = Utc::now();
        Self {
            host_id: new.host_id,
            hostname: new.hostname,
            port: new.port,
            username: new.username,
            os_type: new.os_type,
            auth: new.auth,
            capacity_max_swarms: new.capacity_max_swarms,
            current_swarms: 0,
            status: HostStatus::Offline,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.current_swarms < self.capacity_max_swarms
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_capacity() -> u32 {
    5
}
