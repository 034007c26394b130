// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

pub mod batch;
pub mod command_executor;
pub mod connection_pool;
pub mod groups;
pub mod health_poller;
pub mod hosts;
pub mod repository_factory;
pub mod swarm_control;

// Re-export services for convenience
pub use batch::{BatchError, BatchOrchestrator};
pub use command_executor::{CommandError, CommandExecutor, ExecuteOptions, LogStreamHandle};
pub use connection_pool::{ConnectionPool, PoolError, PooledSession, SlotStats};
pub use groups::SwarmGroupService;
pub use health_poller::{HealthPoller, PollCycleReport};
pub use hosts::{ConnectionTest, HostError, HostService};
pub use repository_factory::{create_repositories, Repositories};
pub use swarm_control::{ControlError, SwarmControlService};
