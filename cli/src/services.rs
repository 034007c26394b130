// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! In-process control plane services
//!
//! Builds every core service from one configuration manifest. The daemon and
//! the one-shot commands share this wiring; only the control dispatcher
//! differs between them.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use qiflow_core::{
    application::{
        repository_factory::create_repositories, BatchOrchestrator, CommandExecutor,
        ConnectionPool, HealthPoller, HostService, Repositories, SwarmControlService,
        SwarmGroupService,
    },
    domain::{
        config::ControlPlaneConfigManifest,
        dispatch::ControlDispatcher,
        repository::{PostgresConfig, StorageBackend},
    },
    infrastructure::{
        cache::TtlCache, db::Database, event_bus::EventBus, ssh::RusshConnector,
        status_client::SwarmStatusClient,
    },
};

pub struct FleetServices {
    pub repositories: Repositories,
    pub event_bus: EventBus,
    pub cache: Arc<TtlCache>,
    pub pool: Arc<ConnectionPool>,
    pub executor: Arc<CommandExecutor>,
    pub poller: Arc<HealthPoller>,
    pub control: Arc<SwarmControlService>,
    pub groups: Arc<SwarmGroupService>,
    pub batches: Arc<BatchOrchestrator>,
    pub hosts: Arc<HostService>,
}

impl FleetServices {
    /// Connect storage (running migrations for PostgreSQL) and build the
    /// service graph. Control actions are handed to `dispatcher`.
    pub async fn build(
        config: &ControlPlaneConfigManifest,
        dispatcher: Arc<dyn ControlDispatcher>,
    ) -> Result<Self> {
        let spec = &config.spec;

        let (backend, pg_pool) = match &spec.database {
            Some(db) => {
                info!("Connecting to PostgreSQL");
                let database = Database::new(&db.url, db.max_connections)
                    .await
                    .context("Failed to connect to database")?;
                database
                    .migrate()
                    .await
                    .context("Failed to apply database migrations")?;
                let backend = StorageBackend::PostgreSQL(PostgresConfig {
                    connection_string: db.url.clone(),
                    max_connections: db.max_connections,
                });
                (backend, Some(database.get_pool().clone()))
            }
            None => {
                warn!("No database configured; using empty in-memory repositories");
                (StorageBackend::InMemory, None)
            }
        };

        let repositories = create_repositories(&backend, pg_pool)
            .context("Failed to create repositories")?;
        Self::from_repositories(config, repositories, dispatcher)
    }

    /// Build the service graph over existing repositories.
    pub fn from_repositories(
        config: &ControlPlaneConfigManifest,
        repositories: Repositories,
        dispatcher: Arc<dyn ControlDispatcher>,
    ) -> Result<Self> {
        let spec = &config.spec;
        let event_bus = EventBus::with_default_capacity();

        let pool = Arc::new(ConnectionPool::new(
            repositories.hosts.clone(),
            Arc::new(RusshConnector::new()),
            spec.pool.clone(),
        ));
        let executor = Arc::new(CommandExecutor::new(
            repositories.hosts.clone(),
            pool.clone(),
            repositories.audit.clone(),
            event_bus.clone(),
        ));

        let status_client = SwarmStatusClient::new(spec.poller.request_timeout())
            .context("Failed to build swarm status client")?;
        let poller = Arc::new(HealthPoller::new(
            repositories.swarms.clone(),
            status_client,
            event_bus.clone(),
            spec.poller.clone(),
        ));

        let cache = Arc::new(TtlCache::new());
        let control = Arc::new(SwarmControlService::new(
            repositories.swarms.clone(),
            repositories.audit.clone(),
            cache.clone(),
            dispatcher,
            event_bus.clone(),
        ));
        let groups = Arc::new(SwarmGroupService::new());
        let batches = Arc::new(BatchOrchestrator::new(
            repositories.swarms.clone(),
            control.clone(),
            groups.clone(),
            event_bus.clone(),
            spec.batch.clone(),
        ));
        let hosts = Arc::new(HostService::new(
            repositories.hosts.clone(),
            pool.clone(),
            repositories.audit.clone(),
        ));

        Ok(Self {
            repositories,
            event_bus,
            cache,
            pool,
            executor,
            poller,
            control,
            groups,
            batches,
            hosts,
        })
    }

    /// Stop background work and close every pooled session.
    pub async fn shutdown(&self) {
        self.poller.stop().await;
        self.pool.close_all().await;
    }
}
