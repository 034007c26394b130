// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! Health Poller - Background task that keeps swarm health current
//!
//! Each cycle enumerates every swarm, fetches `/status` and
//! `/project/completion` from all of them concurrently, classifies and
//! persists the result, then runs a staleness sweep that marks swarms not
//! seen within the stale window as offline.
//!
//! Per-swarm failures are logged and recorded as `offline`; they never fail
//! the cycle or stop the schedule.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Periodic health polling and staleness detection

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::PollerConfig;
use crate::domain::events::FleetEvent;
use crate::domain::repository::SwarmRepository;
use crate::domain::swarm::{HealthUpdate, Swarm, SwarmStatus};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::status_client::SwarmStatusClient;

/// Counts for one completed poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollCycleReport {
    pub polled: usize,
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
    pub stale_marked: usize,
}

impl PollCycleReport {
    fn tally(&mut self, status: SwarmStatus) {
        self.polled += 1;
        match status {
            SwarmStatus::Online => self.online += 1,
            SwarmStatus::Degraded => self.degraded += 1,
            SwarmStatus::Offline => self.offline += 1,
        }
    }
}

struct PollerTask {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct HealthPoller {
    swarms: Arc<dyn SwarmRepository>,
    client: SwarmStatusClient,
    event_bus: EventBus,
    config: PollerConfig,
    task: parking_lot::Mutex<Option<PollerTask>>,
}

impl HealthPoller {
    pub fn new(
        swarms: Arc<dyn SwarmRepository>,
        client: SwarmStatusClient,
        event_bus: EventBus,
        config: PollerConfig,
    ) -> Self {
        Self {
            swarms,
            client,
            event_bus,
            config,
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Run one cycle immediately, then every `interval`. Calling `start` on a
    /// running poller does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Health poller already running");
            return;
        }

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let poller: Weak<Self> = Arc::downgrade(self);
        let period = self.config.interval();

        info!(
            interval_secs = self.config.interval_secs,
            stale_after_secs = self.config.stale_after_secs,
            "Starting health poller"
        );

        let handle = tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let Some(poller) = poller.upgrade() else { break };
                        let report = poller.poll_once().await;
                        debug!(?report, "Health poll cycle completed");
                    }
                    _ = token.cancelled() => {
                        info!("Health poller shutting down");
                        break;
                    }
                }
            }
        });

        *task = Some(PollerTask { shutdown, handle });
    }

    /// Stop the schedule and wait for an in-flight cycle to finish. A poller
    /// that was never started is left untouched.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };
        task.shutdown.cancel();
        if let Err(e) = task.handle.await {
            warn!("Health poller task failed: {}", e);
        }
    }

    pub fn is_polling(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Poll every swarm once, then sweep for stale swarms.
    pub async fn poll_once(&self) -> PollCycleReport {
        let mut report = PollCycleReport::default();

        match self.swarms.find_all().await {
            Ok(swarms) => {
                let statuses = join_all(swarms.iter().map(|swarm| self.poll_swarm(swarm))).await;
                for status in statuses {
                    report.tally(status);
                }
            }
            Err(e) => warn!("Failed to enumerate swarms for health poll: {}", e),
        }

        report.stale_marked = self.sweep_stale().await;

        info!(
            polled = report.polled,
            online = report.online,
            degraded = report.degraded,
            offline = report.offline,
            stale_marked = report.stale_marked,
            "Health poll cycle finished"
        );
        report
    }

    /// Mark every non-offline swarm not seen within the stale window as
    /// offline. Returns the number of swarms marked.
    pub async fn sweep_stale(&self) -> usize {
        let swarms = match self.swarms.find_all().await {
            Ok(swarms) => swarms,
            Err(e) => {
                warn!("Failed to enumerate swarms for staleness sweep: {}", e);
                return 0;
            }
        };

        let threshold = chrono::Duration::seconds(self.config.stale_after_secs as i64);
        let now = Utc::now();
        let mut marked = 0;

        for swarm in swarms.iter().filter(|s| s.is_stale(now, threshold)) {
            match self
                .swarms
                .update_status(&swarm.swarm_id, SwarmStatus::Offline)
                .await
            {
                Ok(()) => {
                    marked += 1;
                    info!(
                        swarm_id = %swarm.swarm_id,
                        last_seen = ?swarm.last_seen,
                        "Marked stale swarm offline"
                    );
                    self.publish_transition(swarm, SwarmStatus::Offline);
                }
                Err(e) => {
                    warn!(swarm_id = %swarm.swarm_id, "Failed to mark stale swarm offline: {}", e)
                }
            }
        }
        marked
    }

    async fn poll_swarm(&self, swarm: &Swarm) -> SwarmStatus {
        let (status, completion) = tokio::join!(
            self.client.fetch_status(&swarm.host_url),
            self.client.fetch_completion(&swarm.host_url),
        );

        let update = match status {
            Ok(payload) => {
                if let Err(e) = &completion {
                    debug!(swarm_id = %swarm.swarm_id, "Completion unavailable: {}", e);
                }
                HealthUpdate {
                    status: payload.classify(),
                    metrics: Some(payload.metrics()),
                    active_agents: Some(payload.active_agents()),
                    project_completion: completion.ok(),
                    seen_at: Some(Utc::now()),
                }
            }
            Err(e) => {
                warn!(
                    swarm_id = %swarm.swarm_id,
                    host_url = %swarm.host_url,
                    error_kind = %e.kind(),
                    "Swarm status poll failed: {}",
                    e
                );
                HealthUpdate::unreachable()
            }
        };

        metrics::counter!("qiflow_poll_results_total", "status" => update.status.as_str())
            .increment(1);

        if let Err(e) = self.swarms.update_health(&swarm.swarm_id, &update).await {
            warn!(swarm_id = %swarm.swarm_id, "Failed to persist swarm health: {}", e);
        }

        if update.status != swarm.status {
            self.publish_transition(swarm, update.status);
        }
        update.status
    }

    fn publish_transition(&self, swarm: &Swarm, current: SwarmStatus) {
        self.event_bus.publish(FleetEvent::SwarmHealthChanged {
            swarm_id: swarm.swarm_id.clone(),
            previous: swarm.status,
            current,
            changed_at: Utc::now(),
        });
    }
}

impl Drop for HealthPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.shutdown.cancel();
        }
    }
}
