// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

// Control Plane Configuration Types
//
// Defines the configuration schema for a QiFlow control plane node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - SSH connection pool timeouts
// - Health poller cadence and staleness window
// - Batch result retention
// - Optional PostgreSQL persistence
// - Logging settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "qiflow.dev/v1";
pub const KIND: &str = "ControlPlaneConfig";

/// Top-level Kubernetes-style control plane configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfigManifest {
    /// API version (must be "qiflow.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ControlPlaneConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: ControlPlaneSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlPlaneSpec {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    /// PostgreSQL persistence; absent means in-memory repositories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hard limit on SSH connect + authenticate
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Sessions idle longer than this are closed by the sweeper
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    /// Per-request HTTP timeout for status and completion fetches
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Swarms not seen for longer than this are marked offline
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            stale_after_secs: default_stale_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum batch results kept in memory; oldest are evicted first
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Number of results returned by a listing
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            list_limit: default_list_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    5
}

fn default_stale_after() -> u64 {
    60
}

fn default_retention() -> usize {
    1000
}

fn default_list_limit() -> usize {
    100
}

fn default_max_connections() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ControlPlaneConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "qiflow-control".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: ControlPlaneSpec::default(),
        }
    }
}

impl ControlPlaneConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. QIFLOW_CONFIG_PATH environment variable
    /// 2. ./qiflow-config.yaml (working directory)
    /// 3. ~/.qiflow/config.yaml (user home)
    /// 4. /etc/qiflow/config.yaml (system, Unix) or C:\ProgramData\QiFlow\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("QIFLOW_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./qiflow-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".qiflow").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/qiflow/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\QiFlow\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must load
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("QIFLOW_DATABASE_URL") {
            tracing::info!("Environment override: QIFLOW_DATABASE_URL");
            match self.spec.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    self.spec.database = Some(DatabaseConfig {
                        url,
                        max_connections: default_max_connections(),
                    })
                }
            }
        }

        if let Some(val) = lookup("QIFLOW_POLL_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!("Environment override: QIFLOW_POLL_INTERVAL_SECS={}", secs);
                    self.spec.poller.interval_secs = secs;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for QIFLOW_POLL_INTERVAL_SECS: '{}'. Expected seconds. Ignoring.",
                    val
                ),
            }
        }

        if let Some(val) = lookup("QIFLOW_POLLER_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: QIFLOW_POLLER_ENABLED=true");
                    self.spec.poller.enabled = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: QIFLOW_POLLER_ENABLED=false");
                    self.spec.poller.enabled = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for QIFLOW_POLLER_ENABLED: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn logging(&self) -> LoggingConfig {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.logging.clone())
            .unwrap_or_default()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let pool = &self.spec.pool;
        if pool.connect_timeout_secs == 0 {
            anyhow::bail!("spec.pool.connect_timeout_secs must be greater than zero");
        }
        if pool.idle_timeout_secs == 0 {
            anyhow::bail!("spec.pool.idle_timeout_secs must be greater than zero");
        }
        if pool.sweep_interval_secs == 0 {
            anyhow::bail!("spec.pool.sweep_interval_secs must be greater than zero");
        }

        let poller = &self.spec.poller;
        if poller.interval_secs == 0 {
            anyhow::bail!("spec.poller.interval_secs must be greater than zero");
        }
        if poller.request_timeout_secs == 0 {
            anyhow::bail!("spec.poller.request_timeout_secs must be greater than zero");
        }
        if poller.request_timeout_secs >= poller.interval_secs {
            anyhow::bail!(
                "spec.poller.request_timeout_secs ({}) must be shorter than interval_secs ({})",
                poller.request_timeout_secs,
                poller.interval_secs
            );
        }
        if poller.stale_after_secs == 0 {
            anyhow::bail!("spec.poller.stale_after_secs must be greater than zero");
        }

        if self.spec.batch.list_limit == 0 {
            anyhow::bail!("spec.batch.list_limit must be greater than zero");
        }

        if let Some(db) = &self.spec.database {
            if db.url.trim().is_empty() {
                anyhow::bail!("spec.database.url cannot be empty");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = ControlPlaneConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.pool.connect_timeout_secs, 30);
        assert_eq!(manifest.spec.pool.idle_timeout_secs, 300);
        assert_eq!(manifest.spec.poller.interval_secs, 30);
        assert_eq!(manifest.spec.poller.stale_after_secs, 60);
        assert_eq!(manifest.spec.batch.list_limit, 100);
        assert!(manifest.spec.database.is_none());
    }

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: qiflow.dev/v1
kind: ControlPlaneConfig
metadata:
  name: ops-east
spec:
  poller:
    interval_secs: 15
  database:
    url: postgres://qiflow@localhost/qiflow
"#;
        let manifest = ControlPlaneConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "ops-east");
        assert_eq!(manifest.spec.poller.interval_secs, 15);
        assert_eq!(manifest.spec.poller.request_timeout_secs, 5);
        assert!(manifest.spec.poller.enabled);
        assert_eq!(manifest.spec.database.as_ref().unwrap().max_connections, 5);
        assert_eq!(manifest.logging().format, "text");
        manifest.validate().unwrap();
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qiflow-config.yaml");

        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.batch.retention = 50;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = ControlPlaneConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec.batch.retention, 50);
    }

    #[test]
    fn test_env_overrides() {
        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.apply_overrides_from(|key| match key {
            "QIFLOW_DATABASE_URL" => Some("postgres://db/qiflow".to_string()),
            "QIFLOW_POLL_INTERVAL_SECS" => Some("45".to_string()),
            "QIFLOW_POLLER_ENABLED" => Some("off".to_string()),
            _ => None,
        });
        assert_eq!(manifest.spec.database.unwrap().url, "postgres://db/qiflow");
        assert_eq!(manifest.spec.poller.interval_secs, 45);
        assert!(!manifest.spec.poller.enabled);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut manifest = ControlPlaneConfigManifest::default();
        manifest.apply_overrides_from(|key| match key {
            "QIFLOW_POLL_INTERVAL_SECS" => Some("soon".to_string()),
            "QIFLOW_POLLER_ENABLED" => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(manifest.spec.poller.interval_secs, 30);
        assert!(manifest.spec.poller.enabled);
    }

    #[test]
    fn test_validation() {
        let mut manifest = ControlPlaneConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.metadata.name = "".to_string();
        assert!(manifest.validate().is_err());
        manifest.metadata.name = "ops".to_string();

        manifest.spec.poller.request_timeout_secs = 30;
        assert!(manifest.validate().is_err());
        manifest.spec.poller.request_timeout_secs = 5;

        manifest.spec.pool.connect_timeout_secs = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.pool.connect_timeout_secs = 30;

        manifest.spec.database = Some(DatabaseConfig {
            url: " ".to_string(),
            max_connections: 5,
        });
        assert!(manifest.validate().is_err());
    }
}
