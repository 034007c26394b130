// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Aggregates, value objects and the seams the application layer programs
//! against.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Fleet model, whitelists, repository and transport traits

pub mod audit;
pub mod batch;
pub mod command;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod host;
pub mod repository;
pub mod ssh;
pub mod swarm;
