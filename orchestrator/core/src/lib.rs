// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! QiFlow control plane core
//!
//! Connection pooling, whitelisted remote execution, health polling, swarm
//! control and batch orchestration for a fleet of agent swarms.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain, application services and infrastructure adapters

pub mod domain;
pub mod application;
pub mod infrastructure;
