// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the QiFlow CLI

pub mod batch;
pub mod config;
pub mod control;
pub mod daemon;
pub mod host;
pub mod poll;
pub mod update;

pub use self::batch::BatchArgs;
pub use self::config::ConfigCommand;
pub use self::control::ControlArgs;
pub use self::host::HostCommand;
pub use self::update::UpdateCommand;

use anyhow::{bail, Result};
use serde_json::Value;
use tokio::signal;
use tracing::error;

use qiflow_core::domain::control::ControlParameters;

/// Parse a `key=value` action parameter. Values that parse as JSON keep
/// their type; anything else is taken as a string.
pub fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("parameter '{}' must be in key=value form", raw);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("parameter '{}' has an empty key", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub(crate) fn collect_params(raw: &[String]) -> Result<ControlParameters> {
    let mut parameters = ControlParameters::new();
    for entry in raw {
        let (key, value) = parse_param(entry)?;
        parameters.insert(key, value);
    }
    Ok(parameters)
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_param_keeps_json_types() {
        assert_eq!(
            parse_param("agent_id=agent-7").unwrap(),
            ("agent_id".to_string(), json!("agent-7"))
        );
        assert_eq!(parse_param("count=3").unwrap().1, json!(3));
        assert_eq!(parse_param("force=true").unwrap().1, json!(true));
        assert_eq!(parse_param("task=a=b").unwrap().1, json!("a=b"));
        assert!(parse_param("no-equals").is_err());
        assert!(parse_param("=value").is_err());
    }

    #[test]
    fn test_collect_params_last_wins() {
        let params = collect_params(&[
            "preset=nightly".to_string(),
            "preset=business_hours".to_string(),
        ])
        .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["preset"], json!("business_hours"));
    }
}
