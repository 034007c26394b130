// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! Adapters behind the domain seams: SSH, HTTP status polling, persistence,
//! caching, dispatch and event streaming.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer

pub mod cache;
pub mod db;
pub mod dispatcher;
pub mod event_bus;
pub mod repositories;
pub mod ssh;
pub mod status_client;
