// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use qiflow_core::domain::config::ControlPlaneConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./qiflow-config.yaml)
        #[arg(short, long, default_value = "./qiflow-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ControlPlaneConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. QIFLOW_CONFIG_PATH: {}",
            std::env::var("QIFLOW_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./qiflow-config.yaml");
        println!("  4. ~/.qiflow/config.yaml");
        println!("  5. /etc/qiflow/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Control Plane:".bold());
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!();

    let spec = &config.spec;
    println!("{}", "SSH Pool:".bold());
    println!("  Connect timeout: {}s", spec.pool.connect_timeout_secs);
    println!("  Idle timeout: {}s", spec.pool.idle_timeout_secs);
    println!("  Sweep interval: {}s", spec.pool.sweep_interval_secs);
    println!();

    println!("{}", "Health Poller:".bold());
    println!("  Enabled: {}", spec.poller.enabled);
    println!("  Interval: {}s", spec.poller.interval_secs);
    println!("  Request timeout: {}s", spec.poller.request_timeout_secs);
    println!("  Stale after: {}s", spec.poller.stale_after_secs);
    println!();

    println!("{}", "Batches:".bold());
    println!("  Retention: {}", spec.batch.retention);
    println!("  List limit: {}", spec.batch.list_limit);
    println!();

    println!("{}", "Storage:".bold());
    match &spec.database {
        Some(db) => {
            println!("  Backend: PostgreSQL");
            println!("  URL: {}", redact_url(&db.url));
            println!("  Max connections: {}", db.max_connections);
        }
        None => println!("  Backend: in-memory"),
    }
    println!();

    let logging = config.logging();
    println!("{}", "Logging:".bold());
    println!("  Level: {}", logging.level);
    println!("  Format: {}", logging.format);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ControlPlaneConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

/// Hide the password component of a connection URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}://{}:****@{}", scheme, user, host),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_valid_manifests() {
        for template in [
            include_str!("../../templates/config-minimal.yaml"),
            include_str!("../../templates/config-with-examples.yaml"),
        ] {
            let config = ControlPlaneConfigManifest::from_yaml_str(template).unwrap();
            config.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_generate_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("qiflow-config.yaml");
        generate(output.clone(), false).await.unwrap();

        let written = ControlPlaneConfigManifest::from_yaml_file(&output).unwrap();
        assert_eq!(written.kind, "ControlPlaneConfig");
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgres://qiflow:secret@db:5432/qiflow"),
            "postgres://qiflow:****@db:5432/qiflow"
        );
        assert_eq!(redact_url("postgres://db/qiflow"), "postgres://db/qiflow");
    }
}
