// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # Remote Command Whitelist
//!
//! The fixed table of shell / PowerShell lines the executor may run on a host.
//! Only the strings in this file ever reach a remote shell; operator-supplied
//! data travels on stdin and is never spliced into a command line.
//!
//! | Command | Linux | Windows | Reads stdin |
//! |---------|-------|---------|-------------|
//! | `restart_swarm` | `systemctl restart` | `Restart-Service` | no |
//! | `update_settings` | `cat > settings.ini` | `Set-Content settings.ini` | yes |
//! | `get_logs` | `tail -n 100` | `Get-Content -Tail 100` | no |
//! | `check_status` | `systemctl is-active` | `Get-Service` | no |
//! | `stop_swarm` | `systemctl stop` | `Stop-Service` | no |
//! | `start_swarm` | `systemctl start` | `Start-Service` | no |
//!
//! The table is compiled in and not runtime-configurable.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Whitelisted command resolution per OS family

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::host::OsType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    RestartSwarm,
    UpdateSettings,
    GetLogs,
    CheckStatus,
    StopSwarm,
    StartSwarm,
}

impl CommandType {
    pub const ALL: [CommandType; 6] = [
        CommandType::RestartSwarm,
        CommandType::UpdateSettings,
        CommandType::GetLogs,
        CommandType::CheckStatus,
        CommandType::StopSwarm,
        CommandType::StartSwarm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::RestartSwarm => "restart_swarm",
            CommandType::UpdateSettings => "update_settings",
            CommandType::GetLogs => "get_logs",
            CommandType::CheckStatus => "check_status",
            CommandType::StopSwarm => "stop_swarm",
            CommandType::StartSwarm => "start_swarm",
        }
    }

    /// Whether the command consumes operator input on stdin.
    pub fn accepts_input(&self) -> bool {
        matches!(self, CommandType::UpdateSettings)
    }

    fn entry(&self) -> &'static CommandEntry {
        match self {
            CommandType::RestartSwarm => &RESTART_SWARM,
            CommandType::UpdateSettings => &UPDATE_SETTINGS,
            CommandType::GetLogs => &GET_LOGS,
            CommandType::CheckStatus => &CHECK_STATUS,
            CommandType::StopSwarm => &STOP_SWARM,
            CommandType::StartSwarm => &START_SWARM,
        }
    }

    /// Resolve the command line for an OS family. `None` means the command has
    /// no implementation for that OS.
    pub fn command_for(&self, os: OsType) -> Option<&'static str> {
        let entry = self.entry();
        match os {
            OsType::Linux => entry.linux,
            OsType::Windows => entry.windows,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a name is not in the whitelist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command '{}' is not whitelisted", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

impl FromStr for CommandType {
    type Err = UnknownCommand;

    /// Exact match only; no trimming or case folding.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandType::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

struct CommandEntry {
    linux: Option<&'static str>,
    windows: Option<&'static str>,
}

// ============================================================================
// Command table
// ============================================================================

const LINUX_SWARM_DIR: &str = "/opt/qiflow/swarm";
const WINDOWS_SWARM_DIR: &str = r"C:\QiFlow\swarm";

static RESTART_SWARM: CommandEntry = CommandEntry {
    linux: Some("sudo -n systemctl restart qiflow-swarm"),
    windows: Some(
        r#"powershell -NoProfile -NonInteractive -Command "Restart-Service -Name QiFlowSwarm""#,
    ),
};

static UPDATE_SETTINGS: CommandEntry = CommandEntry {
    linux: Some("cat > /opt/qiflow/swarm/settings.ini"),
    windows: Some(
        r#"powershell -NoProfile -NonInteractive -Command "$input | Set-Content -Path 'C:\QiFlow\swarm\settings.ini'""#,
    ),
};

static GET_LOGS: CommandEntry = CommandEntry {
    linux: Some("tail -n 100 /opt/qiflow/swarm/heartbeat.log"),
    windows: Some(
        r#"powershell -NoProfile -NonInteractive -Command "Get-Content -Path 'C:\QiFlow\swarm\heartbeat.log' -Tail 100""#,
    ),
};

static CHECK_STATUS: CommandEntry = CommandEntry {
    linux: Some("systemctl is-active qiflow-swarm"),
    windows: Some(
        r#"powershell -NoProfile -NonInteractive -Command "(Get-Service -Name QiFlowSwarm).Status""#,
    ),
};

static STOP_SWARM: CommandEntry = CommandEntry {
    linux: Some("sudo -n systemctl stop qiflow-swarm"),
    windows: Some(
        r#"powershell -NoProfile -NonInteractive -Command "Stop-Service -Name QiFlowSwarm""#,
    ),
};

static START_SWARM: CommandEntry = CommandEntry {
    linux: Some("sudo -n systemctl start qiflow-swarm"),
    windows: Some(
        r#"powershell -NoProfile -NonInteractive -Command "Start-Service -Name QiFlowSwarm""#,
    ),
};

/// Long-running follow command used for log streaming.
pub fn follow_logs_command(os: OsType) -> String {
    match os {
        OsType::Linux => format!("tail -n 50 -F {}/heartbeat.log", LINUX_SWARM_DIR),
        OsType::Windows => format!(
            r#"powershell -NoProfile -NonInteractive -Command "Get-Content -Path '{}\heartbeat.log' -Tail 50 -Wait""#,
            WINDOWS_SWARM_DIR
        ),
    }
}

/// Result of one whitelisted command run. A non-zero `exit_code` is reported
/// here with `success: false`; it is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_has_both_os_variants() {
        for command in CommandType::ALL {
            assert!(command.command_for(OsType::Linux).is_some(), "{}", command);
            assert!(command.command_for(OsType::Windows).is_some(), "{}", command);
        }
    }

    #[test]
    fn test_parse_rejects_anything_outside_the_table() {
        assert_eq!("get_logs".parse::<CommandType>().unwrap(), CommandType::GetLogs);
        assert!("rm -rf /".parse::<CommandType>().is_err());
        assert!("GET_LOGS".parse::<CommandType>().is_err());
        assert!(" get_logs".parse::<CommandType>().is_err());
    }

    #[test]
    fn test_only_update_settings_reads_stdin() {
        let readers: Vec<_> = CommandType::ALL
            .iter()
            .filter(|c| c.accepts_input())
            .collect();
        assert_eq!(readers, vec![&CommandType::UpdateSettings]);
    }

    #[test]
    fn test_follow_command_targets_heartbeat_log() {
        assert!(follow_logs_command(OsType::Linux).starts_with("tail -n 50 -F"));
        assert!(follow_logs_command(OsType::Windows).contains("-Wait"));
    }
}
