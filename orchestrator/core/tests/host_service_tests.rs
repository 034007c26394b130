// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

mod support;

use std::sync::Arc;
use tempfile::NamedTempFile;

use qiflow_core::application::command_executor::{CommandExecutor, ExecuteOptions};
use qiflow_core::application::connection_pool::{ConnectionPool, PoolError};
use qiflow_core::application::hosts::{HostError, HostService};
use qiflow_core::domain::host::{HostId, HostStatus, OsType};
use qiflow_core::domain::repository::{AuditLogRepository, HostRepository, RepositoryError};
use qiflow_core::infrastructure::event_bus::EventBus;
use qiflow_core::infrastructure::repositories::{
    InMemoryAuditLogRepository, InMemoryHostRepository,
};

use support::{key_file, new_host, pool_config, ConnectBehavior, FakeSsh};

struct Fixture {
    service: HostService,
    executor: CommandExecutor,
    hosts: Arc<dyn HostRepository>,
    pool: Arc<ConnectionPool>,
    ssh: Arc<FakeSsh>,
    key: NamedTempFile,
}

fn fixture() -> Fixture {
    let hosts: Arc<dyn HostRepository> = Arc::new(InMemoryHostRepository::new());
    let audit: Arc<dyn AuditLogRepository> = Arc::new(InMemoryAuditLogRepository::new());
    let ssh = FakeSsh::new();
    let pool = Arc::new(ConnectionPool::new(hosts.clone(), ssh.connector(), pool_config()));
    Fixture {
        service: HostService::new(hosts.clone(), pool.clone(), audit.clone()),
        executor: CommandExecutor::new(
            hosts.clone(),
            pool.clone(),
            audit,
            EventBus::with_default_capacity(),
        ),
        hosts,
        pool,
        ssh,
        key: key_file(),
    }
}

#[tokio::test]
async fn test_register_validates_and_starts_offline() {
    let f = fixture();

    let host = f
        .service
        .register_host(new_host("h1", OsType::Linux, Some(&f.key)))
        .await
        .unwrap();
    assert_eq!(host.status, HostStatus::Offline);
    assert!(host.last_seen.is_none());

    let dup = f
        .service
        .register_host(new_host("h1", OsType::Linux, Some(&f.key)))
        .await
        .unwrap_err();
    assert!(matches!(dup, HostError::Repository(RepositoryError::AlreadyExists(_))));

    let mut bad = new_host("h2", OsType::Linux, None);
    bad.hostname = "two words".to_string();
    assert!(matches!(
        f.service.register_host(bad).await,
        Err(HostError::InvalidHost(_))
    ));

    let mut bad = new_host("h3", OsType::Linux, None);
    bad.port = 0;
    assert!(matches!(
        f.service.register_host(bad).await,
        Err(HostError::InvalidHost(_))
    ));
}

#[tokio::test]
async fn test_connection_test_updates_host_status() {
    let f = fixture();
    let id = HostId::new("h1");
    f.service
        .register_host(new_host("h1", OsType::Linux, Some(&f.key)))
        .await
        .unwrap();

    let report = f.service.test_connection(&id).await.unwrap();
    assert_eq!(report.host_id, id);
    let host = f.hosts.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(host.status, HostStatus::Online);
    assert!(host.last_seen.is_some());

    // The tested session stays pooled for later commands.
    f.executor
        .execute(&id, "check_status", ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(f.ssh.connects(), 1);

    f.pool.close(&id).await;
    f.ssh.set_behavior(ConnectBehavior::RejectAuth);
    let err = f.service.test_connection(&id).await.unwrap_err();
    assert!(matches!(err, PoolError::AuthError { .. }));
    let host = f.hosts.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(host.status, HostStatus::Error);
}

#[tokio::test]
async fn test_delete_closes_pooled_session_first() {
    let f = fixture();
    let id = HostId::new("h1");
    f.service
        .register_host(new_host("h1", OsType::Linux, Some(&f.key)))
        .await
        .unwrap();
    f.service.test_connection(&id).await.unwrap();
    assert_eq!(f.pool.stats().len(), 1);

    f.service.delete_host(&id).await.unwrap();
    assert_eq!(f.ssh.closes(), 1);
    assert!(f.pool.stats().is_empty());
    assert!(matches!(
        f.service.get_host(&id).await,
        Err(HostError::HostNotFound(_))
    ));
    assert!(matches!(
        f.service.delete_host(&id).await,
        Err(HostError::HostNotFound(_))
    ));
}

#[tokio::test]
async fn test_audit_logs_newest_first_with_limit() {
    let f = fixture();
    let id = HostId::new("h1");
    f.service
        .register_host(new_host("h1", OsType::Linux, Some(&f.key)))
        .await
        .unwrap();

    for command in ["check_status", "restart_swarm", "get_logs"] {
        f.executor
            .execute(&id, command, ExecuteOptions::default())
            .await
            .unwrap();
    }

    let logs = f.service.audit_logs(&id, 2).await.unwrap();
    let commands: Vec<_> = logs.iter().map(|l| l.command.as_str()).collect();
    assert_eq!(commands, vec!["get_logs", "restart_swarm"]);
}

#[tokio::test]
async fn test_delete_ends_running_log_stream() {
    let f = fixture();
    let id = HostId::new("h1");
    f.service
        .register_host(new_host("h1", OsType::Linux, Some(&f.key)))
        .await
        .unwrap();

    let stream = f
        .executor
        .stream_logs(&id, |_| {}, |e| panic!("unexpected stream error: {}", e))
        .await
        .unwrap();
    assert!(!stream.is_finished());

    f.service.delete_host(&id).await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), stream.join())
        .await
        .expect("stream on deleted host kept running");
    assert_eq!(f.ssh.closes(), 1);
}
