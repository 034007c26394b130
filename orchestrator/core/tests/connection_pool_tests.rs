// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

use qiflow_core::application::connection_pool::{ConnectionPool, PoolError};
use qiflow_core::domain::errors::ErrorKind;
use qiflow_core::domain::host::{HostId, OsType};
use qiflow_core::domain::repository::HostRepository;
use qiflow_core::infrastructure::repositories::InMemoryHostRepository;

use support::{key_file, pool_config, seed_host, ConnectBehavior, FakeSsh};

struct Fixture {
    hosts: Arc<dyn HostRepository>,
    ssh: Arc<FakeSsh>,
    pool: Arc<ConnectionPool>,
    key: NamedTempFile,
}

async fn fixture() -> Fixture {
    let hosts: Arc<dyn HostRepository> = Arc::new(InMemoryHostRepository::new());
    let ssh = FakeSsh::new();
    let key = key_file();
    seed_host(&hosts, "h1", OsType::Linux, Some(&key)).await;
    seed_host(&hosts, "h2", OsType::Windows, Some(&key)).await;
    let pool = Arc::new(ConnectionPool::new(hosts.clone(), ssh.connector(), pool_config()));
    Fixture { hosts, ssh, pool, key }
}

#[tokio::test]
async fn test_acquire_release_acquire_reuses_session() {
    let f = fixture().await;
    let h1 = HostId::new("h1");

    let first = f.pool.acquire(&h1).await.unwrap();
    let first_out = first.session().exec("true", None).await.unwrap();
    f.pool.release(first);

    let second = f.pool.acquire(&h1).await.unwrap();
    let second_out = second.session().exec("true", None).await.unwrap();
    second.release();

    assert_eq!(f.ssh.connects(), 1);
    assert_eq!(first_out.stdout, second_out.stdout);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_never_share_a_session() {
    let f = fixture().await;
    *f.ssh.exec_delay.lock() = Duration::from_millis(50);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = f.pool.clone();
        tasks.push(tokio::spawn(async move {
            let pooled = pool.acquire(&HostId::new("h1")).await.unwrap();
            pooled.session().exec("systemctl is-active qiflow-swarm", None).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(f.ssh.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(f.ssh.connects(), 1);
    assert_eq!(f.ssh.executed().len(), 8);
}

#[tokio::test]
async fn test_hosts_get_independent_sessions() {
    let f = fixture().await;
    let a = f.pool.acquire(&HostId::new("h1")).await.unwrap();
    let b = f.pool.acquire(&HostId::new("h2")).await.unwrap();
    assert_eq!(f.ssh.connects(), 2);

    let stats = f.pool.stats();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.in_use));
    drop((a, b));
    assert!(f.pool.stats().iter().all(|s| !s.in_use && s.connected));
}

#[tokio::test]
async fn test_unknown_host_fails_without_connecting() {
    let f = fixture().await;
    let err = f.pool.acquire(&HostId::new("nope")).await.unwrap_err();
    assert!(matches!(err, PoolError::HostNotFound(ref id) if id.as_str() == "nope"));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(f.ssh.connects(), 0);
}

#[tokio::test]
async fn test_key_problems_are_typed() {
    let f = fixture().await;
    seed_host(&f.hosts, "keyless", OsType::Linux, None).await;
    let err = f.pool.acquire(&HostId::new("keyless")).await.unwrap_err();
    assert!(matches!(err, PoolError::AuthError { .. }));

    let vanished = key_file();
    seed_host(&f.hosts, "vanished", OsType::Linux, Some(&vanished)).await;
    vanished.close().unwrap();
    let err = f.pool.acquire(&HostId::new("vanished")).await.unwrap_err();
    assert!(matches!(err, PoolError::KeyReadFailure { .. }));
    assert_eq!(f.ssh.connects(), 0);
    assert!(f.key.path().exists());
}

#[tokio::test]
async fn test_transport_failures_are_typed() {
    let f = fixture().await;
    let h1 = HostId::new("h1");

    f.ssh.set_behavior(ConnectBehavior::RejectAuth);
    let err = f.pool.acquire(&h1).await.unwrap_err();
    assert!(matches!(err, PoolError::AuthError { .. }));

    f.ssh.set_behavior(ConnectBehavior::Refuse);
    let err = f.pool.acquire(&h1).await.unwrap_err();
    assert!(matches!(err, PoolError::ConnectionFailure { .. }));
    assert_eq!(err.kind(), ErrorKind::ConnectionFailure);

    // A failed attempt leaves the slot usable for the next one.
    f.ssh.set_behavior(ConnectBehavior::Accept);
    assert!(f.pool.acquire(&h1).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let f = fixture().await;
    f.ssh.set_behavior(ConnectBehavior::Hang);

    let err = f.pool.acquire(&HostId::new("h1")).await.unwrap_err();
    assert!(matches!(err, PoolError::ConnectTimeout { timeout_secs: 30, .. }));
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_disconnected_session_is_rebuilt() {
    let f = fixture().await;
    let h1 = HostId::new("h1");

    let pooled = f.pool.acquire(&h1).await.unwrap();
    pooled.session().close().await;
    pooled.release();

    let pooled = f.pool.acquire(&h1).await.unwrap();
    assert!(pooled.session().is_connected());
    assert_eq!(f.ssh.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_idle_sweep_evicts_only_expired_idle_sessions() {
    let f = fixture().await;
    let h1 = HostId::new("h1");
    let h2 = HostId::new("h2");

    f.pool.acquire(&h1).await.unwrap().release();
    tokio::time::advance(Duration::from_secs(299)).await;
    assert_eq!(f.pool.sweep_idle().await, 0);

    let held = f.pool.acquire(&h2).await.unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(f.pool.sweep_idle().await, 1);
    assert_eq!(f.ssh.closes(), 1);

    tokio::time::advance(Duration::from_secs(600)).await;
    assert_eq!(f.pool.sweep_idle().await, 0, "checked-out slot must survive");
    drop(held);

    f.pool.acquire(&h1).await.unwrap().release();
    assert_eq!(f.ssh.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_runs_on_interval() {
    let f = fixture().await;
    f.pool.start_sweeper();
    f.pool.start_sweeper();

    f.pool.acquire(&HostId::new("h1")).await.unwrap().release();
    tokio::time::sleep(Duration::from_secs(361)).await;

    assert_eq!(f.ssh.closes(), 1);
    assert!(f.pool.stats().is_empty());
    f.pool.close_all().await;
}

#[tokio::test]
async fn test_close_and_close_all() {
    let f = fixture().await;
    let h1 = HostId::new("h1");
    let h2 = HostId::new("h2");

    f.pool.acquire(&h1).await.unwrap().release();
    f.pool.acquire(&h2).await.unwrap().release();

    f.pool.close(&h1).await;
    assert_eq!(f.ssh.closes(), 1);
    assert_eq!(f.pool.stats().len(), 1);

    // Closing an unknown host is harmless.
    f.pool.close(&HostId::new("ghost")).await;

    f.pool.close_all().await;
    assert_eq!(f.ssh.closes(), 2);
    assert!(f.pool.stats().is_empty());
}

#[tokio::test]
async fn test_close_waits_for_checkout() {
    let f = fixture().await;
    let h1 = HostId::new("h1");

    let pooled = f.pool.acquire(&h1).await.unwrap();
    let pool = f.pool.clone();
    let closer = tokio::spawn(async move { pool.close(&HostId::new("h1")).await });

    tokio::task::yield_now().await;
    assert!(pooled.session().is_connected());
    pooled.release();

    closer.await.unwrap();
    assert_eq!(f.ssh.closes(), 1);

    // The next checkout builds a fresh session rather than reusing the closed one.
    let pooled = f.pool.acquire(&h1).await.unwrap();
    assert!(pooled.session().is_connected());
    assert_eq!(f.ssh.connects(), 2);
}
