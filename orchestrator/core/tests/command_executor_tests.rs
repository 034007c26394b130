// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, oneshot};

use qiflow_core::application::command_executor::{CommandError, CommandExecutor, ExecuteOptions};
use qiflow_core::application::connection_pool::{ConnectionPool, PoolError};
use qiflow_core::domain::errors::ErrorKind;
use qiflow_core::domain::events::FleetEvent;
use qiflow_core::domain::host::{HostId, OsType};
use qiflow_core::domain::repository::{AuditLogRepository, HostRepository};
use qiflow_core::domain::ssh::StreamChunk;
use qiflow_core::infrastructure::event_bus::EventBus;
use qiflow_core::infrastructure::repositories::{
    InMemoryAuditLogRepository, InMemoryHostRepository,
};

use support::{key_file, pool_config, seed_host, ConnectBehavior, FakeSsh};

struct Fixture {
    executor: CommandExecutor,
    pool: Arc<ConnectionPool>,
    audit: Arc<dyn AuditLogRepository>,
    ssh: Arc<FakeSsh>,
    events: EventBus,
    _key: NamedTempFile,
}

async fn fixture() -> Fixture {
    let hosts: Arc<dyn HostRepository> = Arc::new(InMemoryHostRepository::new());
    let audit: Arc<dyn AuditLogRepository> = Arc::new(InMemoryAuditLogRepository::new());
    let ssh = FakeSsh::new();
    let key = key_file();
    seed_host(&hosts, "linux-1", OsType::Linux, Some(&key)).await;
    seed_host(&hosts, "win-1", OsType::Windows, Some(&key)).await;

    let pool = Arc::new(ConnectionPool::new(hosts.clone(), ssh.connector(), pool_config()));
    let events = EventBus::with_default_capacity();
    let executor = CommandExecutor::new(hosts, pool.clone(), audit.clone(), events.clone());

    Fixture {
        executor,
        pool,
        audit,
        ssh,
        events,
        _key: key,
    }
}

fn linux() -> HostId {
    HostId::new("linux-1")
}

#[tokio::test]
async fn test_unlisted_command_is_rejected_before_any_pool_work() {
    let f = fixture().await;

    for name in ["rm -rf /", "check_status; reboot", "CHECK_STATUS", " check_status"] {
        let err = f
            .executor
            .execute(&linux(), name, ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotWhitelisted(ref n) if n == name));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    // Whitelist check runs before the host lookup.
    let err = f
        .executor
        .execute(&HostId::new("missing"), "rm -rf /", ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::NotWhitelisted(_)));

    assert_eq!(f.ssh.connects(), 0);
    assert!(f.pool.stats().is_empty());
    assert!(f.audit.get_audit_logs(&linux(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_host_is_rejected_before_any_pool_work() {
    let f = fixture().await;
    let err = f
        .executor
        .execute(&HostId::new("missing"), "check_status", ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::HostNotFound(_)));
    assert_eq!(f.ssh.connects(), 0);
    assert!(f.pool.stats().is_empty());
}

#[tokio::test]
async fn test_successful_command_is_audited() {
    let f = fixture().await;
    let mut events = f.events.subscribe();

    let output = f
        .executor
        .execute(&linux(), "check_status", ExecuteOptions::default())
        .await
        .unwrap();
    assert!(output.success);
    assert_eq!(output.exit_code, 0);
    assert_eq!(output.stdout, "session-1");

    let executed = f.ssh.executed();
    assert_eq!(executed[0].0, "systemctl is-active qiflow-swarm");

    let logs = f.audit.get_audit_logs(&linux(), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].command, "check_status");
    assert_eq!(logs[0].executed_by, "system");
    assert!(logs[0].success);

    match events.recv().await.unwrap() {
        FleetEvent::CommandExecuted { command, success, .. } => {
            assert_eq!(command, "check_status");
            assert!(success);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_nonzero_exit_is_a_result_not_an_error() {
    let f = fixture().await;
    f.ssh.exit_code.store(3, Ordering::SeqCst);

    let output = f
        .executor
        .execute(
            &linux(),
            "restart_swarm",
            ExecuteOptions {
                executed_by: Some("alice".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!output.success);
    assert_eq!(output.exit_code, 3);
    assert_eq!(output.stderr, "unit failed");

    let logs = f.audit.get_audit_logs(&linux(), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert_eq!(logs[0].exit_code, Some(3));
    assert_eq!(logs[0].executed_by, "alice");
}

#[tokio::test]
async fn test_input_travels_on_stdin_only() {
    let f = fixture().await;
    let settings = "[swarm]\nname = edge'; rm -rf / #\n";

    f.executor
        .execute(
            &linux(),
            "update_settings",
            ExecuteOptions {
                input: Some(settings.to_string()),
                executed_by: None,
            },
        )
        .await
        .unwrap();
    f.executor
        .execute(
            &linux(),
            "get_logs",
            ExecuteOptions {
                input: Some("ignored".to_string()),
                executed_by: None,
            },
        )
        .await
        .unwrap();

    let executed = f.ssh.executed();
    assert_eq!(executed[0].0, "cat > /opt/qiflow/swarm/settings.ini");
    assert_eq!(executed[0].1.as_deref(), Some(settings.as_bytes()));
    assert!(!executed[0].0.contains("rm -rf"));

    assert_eq!(executed[1].0, "tail -n 100 /opt/qiflow/swarm/heartbeat.log");
    assert!(executed[1].1.is_none());
}

#[tokio::test]
async fn test_settings_update_without_input_is_rejected() {
    let f = fixture().await;

    for host in [linux(), HostId::new("win-1")] {
        let err = f
            .executor
            .execute(&host, "update_settings", ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::MissingInput(ref n) if n == "update_settings"));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    assert!(f.ssh.executed().is_empty());
    assert_eq!(f.ssh.connects(), 0);
    assert!(f.pool.stats().is_empty());
    assert!(f.audit.get_audit_logs(&linux(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_windows_hosts_get_powershell_lines() {
    let f = fixture().await;
    f.executor
        .execute(&HostId::new("win-1"), "stop_swarm", ExecuteOptions::default())
        .await
        .unwrap();
    let executed = f.ssh.executed();
    assert!(executed[0].0.starts_with("powershell -NoProfile -NonInteractive"));
    assert!(executed[0].0.contains("Stop-Service -Name QiFlowSwarm"));
}

#[tokio::test]
async fn test_exec_failure_is_audited_and_slot_released() {
    let f = fixture().await;
    f.ssh.fail_exec.store(true, Ordering::SeqCst);

    let err = f
        .executor
        .execute(&linux(), "start_swarm", ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::ExecFailed { .. }));

    let logs = f.audit.get_audit_logs(&linux(), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert!(logs[0].exit_code.is_none());
    assert!(logs[0].error.as_deref().unwrap_or_default().contains("broken pipe"));

    f.ssh.fail_exec.store(false, Ordering::SeqCst);
    let output = tokio::time::timeout(
        Duration::from_secs(5),
        f.executor.execute(&linux(), "start_swarm", ExecuteOptions::default()),
    )
    .await
    .expect("slot was not released");
    tokio_test::assert_ok!(output);
    assert_eq!(f.ssh.connects(), 1);
}

#[tokio::test]
async fn test_connect_failure_is_audited() {
    let f = fixture().await;
    f.ssh.set_behavior(ConnectBehavior::Refuse);

    let err = f
        .executor
        .execute(&linux(), "check_status", ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Connection(PoolError::ConnectionFailure { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::ConnectionFailure);

    let logs = f.audit.get_audit_logs(&linux(), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
}

#[tokio::test]
async fn test_stream_logs_forwards_chunks_until_cancelled() {
    let f = fixture().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = f
        .executor
        .stream_logs(
            &linux(),
            move |chunk| {
                let _ = tx.send(chunk);
            },
            |e| panic!("unexpected stream error: {}", e),
        )
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(StreamChunk::Stdout("heartbeat ok\n".to_string())));
    assert_eq!(rx.recv().await, Some(StreamChunk::Stdout("agents: 3\n".to_string())));

    handle.cancel();
    handle.join().await;

    assert_eq!(f.ssh.closes(), 1);
    assert_eq!(f.ssh.executed()[0].0, "tail -n 50 -F /opt/qiflow/swarm/heartbeat.log");
    // The follow ran on its own session, not the pooled slot.
    assert!(f.pool.stats().is_empty());
}

#[tokio::test]
async fn test_stream_logs_reports_mid_stream_failure() {
    let f = fixture().await;
    f.ssh.fail_exec.store(true, Ordering::SeqCst);
    let (err_tx, err_rx) = oneshot::channel();

    let handle = f
        .executor
        .stream_logs(
            &linux(),
            |_| {},
            move |e| {
                let _ = err_tx.send(e.to_string());
            },
        )
        .await
        .unwrap();

    let message = err_rx.await.unwrap();
    assert!(message.contains("stream reset"));
    handle.join().await;
    assert_eq!(f.ssh.closes(), 1);
}

#[tokio::test]
async fn test_stream_logs_ends_when_host_is_closed_or_pool_shuts_down() {
    let f = fixture().await;

    let linux_stream = f
        .executor
        .stream_logs(&linux(), |_| {}, |e| panic!("unexpected stream error: {}", e))
        .await
        .unwrap();
    let windows_stream = f
        .executor
        .stream_logs(&HostId::new("win-1"), |_| {}, |e| panic!("unexpected stream error: {}", e))
        .await
        .unwrap();

    f.pool.close(&linux()).await;
    tokio::time::timeout(Duration::from_secs(5), linux_stream.join())
        .await
        .expect("stream on closed host kept running");
    assert_eq!(f.ssh.closes(), 1);
    assert!(!windows_stream.is_finished());

    f.pool.close_all().await;
    tokio::time::timeout(Duration::from_secs(5), windows_stream.join())
        .await
        .expect("stream kept running after pool shutdown");
    assert_eq!(f.ssh.closes(), 2);
}
