// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Control dispatchers.
//!
//! - [`ChannelDispatcher`] pushes commands onto an in-process queue that a
//!   consumer (the daemon) drains.
//! - [`LoggingDispatcher`] records intent in the log and delivers nothing.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::domain::control::ControlCommand;
use crate::domain::dispatch::{ControlDispatcher, DispatchError};

pub struct ChannelDispatcher {
    sender: mpsc::Sender<ControlCommand>,
}

impl ChannelDispatcher {
    /// Returns the dispatcher and the receiving end of its queue.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ControlCommand>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ControlDispatcher for ChannelDispatcher {
    async fn dispatch(&self, command: ControlCommand) -> Result<(), DispatchError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

#[async_trait]
impl ControlDispatcher for LoggingDispatcher {
    async fn dispatch(&self, command: ControlCommand) -> Result<(), DispatchError> {
        info!(
            command_id = %command.command_id,
            swarm_id = %command.swarm_id,
            action = %command.action,
            executed_by = %command.executed_by,
            "Control command recorded (no delivery transport configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::control::{ControlAction, ControlParameters};
    use crate::domain::swarm::SwarmId;
    use chrono::Utc;
    use uuid::Uuid;

    fn command() -> ControlCommand {
        ControlCommand {
            command_id: Uuid::new_v4(),
            swarm_id: SwarmId::new("s1"),
            host_url: "http://s1".to_string(),
            action: ControlAction::Pause,
            parameters: ControlParameters::new(),
            executed_by: "ops".to_string(),
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_dispatcher_delivers_in_order() {
        let (dispatcher, mut rx) = ChannelDispatcher::new(4);
        let first = command();
        let second = command();
        dispatcher.dispatch(first.clone()).await.unwrap();
        dispatcher.dispatch(second.clone()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().command_id, first.command_id);
        assert_eq!(rx.recv().await.unwrap().command_id, second.command_id);
    }

    #[tokio::test]
    async fn test_channel_dispatcher_reports_closed_queue() {
        let (dispatcher, rx) = ChannelDispatcher::new(1);
        drop(rx);
        assert!(matches!(
            dispatcher.dispatch(command()).await,
            Err(DispatchError::QueueClosed)
        ));
    }
}
