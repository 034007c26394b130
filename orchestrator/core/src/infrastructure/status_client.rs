// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Swarm Status Client
//!
//! HTTP client for the status API every swarm exposes.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Fetch `/status` and `/project/completion` with a hard timeout
//! - **Integration:** Health poller → reqwest → swarm heartbeat agent
//!
//! Both endpoints are plain unauthenticated JSON. Any timeout, transport error
//! or non-2xx response is a [`PollError`].

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::domain::errors::ErrorKind;
use crate::domain::swarm::{CompletionPayload, SwarmStatusPayload};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::Timeout => ErrorKind::Timeout,
            PollError::Network(_) | PollError::HttpStatus(_) => ErrorKind::ConnectionFailure,
            PollError::Decode(_) => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for PollError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PollError::Timeout
        } else if err.is_decode() {
            PollError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            PollError::HttpStatus(status.as_u16())
        } else {
            PollError::Network(err.to_string())
        }
    }
}

#[derive(Clone)]
pub struct SwarmStatusClient {
    client: Client,
}

impl SwarmStatusClient {
    /// Every request made by this client is bounded by `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, PollError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PollError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn fetch_status(&self, host_url: &str) -> Result<SwarmStatusPayload, PollError> {
        let url = format!("{}/status", host_url.trim_end_matches('/'));
        let payload = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<SwarmStatusPayload>()
            .await?;
        Ok(payload)
    }

    pub async fn fetch_completion(&self, host_url: &str) -> Result<f64, PollError> {
        let url = format!("{}/project/completion", host_url.trim_end_matches('/'));
        let payload = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<CompletionPayload>()
            .await?;
        Ok(payload.completion)
    }
}
