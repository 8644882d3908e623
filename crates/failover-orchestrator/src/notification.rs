//! Lifecycle notifications
//!
//! Sinks are fire-and-forget: a delivery problem is logged and dropped,
//! never retried, and never holds up the scheduler.

use crate::models::execution::ExecutionKind;
use crate::replication::retry::AttemptRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Structured lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started {
        execution_id: Uuid,
        plan_id: String,
        kind: ExecutionKind,
        at: DateTime<Utc>,
    },
    Paused {
        execution_id: Uuid,
        wave_number: u32,
        pause_token: String,
        at: DateTime<Utc>,
    },
    Resumed {
        execution_id: Uuid,
        wave_number: u32,
        at: DateTime<Utc>,
    },
    Completed {
        execution_id: Uuid,
        at: DateTime<Utc>,
    },
    Failed {
        execution_id: Uuid,
        cause: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        execution_id: Uuid,
        at: DateTime<Utc>,
    },
    /// Transient errors outlasted the retry budget; an operator should look
    Escalation {
        execution_id: Option<Uuid>,
        operation: String,
        attempts: Vec<AttemptRecord>,
        at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Escalation { .. } => "escalation",
        }
    }

    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            Self::Started { execution_id, .. }
            | Self::Paused { execution_id, .. }
            | Self::Resumed { execution_id, .. }
            | Self::Completed { execution_id, .. }
            | Self::Failed { execution_id, .. }
            | Self::Cancelled { execution_id, .. } => Some(*execution_id),
            Self::Escalation { execution_id, .. } => *execution_id,
        }
    }
}

/// Destination for lifecycle events
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &LifecycleEvent);
}

/// Emits each event as a structured log line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: &LifecycleEvent) {
        let execution_id = event.execution_id().map(|id| id.to_string()).unwrap_or_default();
        match event {
            LifecycleEvent::Escalation {
                operation, attempts, ..
            } => error!(
                event = event.name(),
                execution_id = %execution_id,
                operation = %operation,
                attempts = attempts.len(),
                "failover escalation"
            ),
            LifecycleEvent::Failed { cause, .. } => warn!(
                event = event.name(),
                execution_id = %execution_id,
                cause = %cause,
                "failover lifecycle"
            ),
            _ => info!(event = event.name(), execution_id = %execution_id, "failover lifecycle"),
        }
    }
}

/// Forwards events into a bounded channel, dropping them when it is full
pub struct ChannelSink {
    sender: mpsc::Sender<LifecycleEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: &LifecycleEvent) {
        if let Err(e) = self.sender.try_send(event.clone()) {
            warn!(event = event.name(), error = %e, "notification dropped");
        }
    }
}

/// Delivers to every inner sink
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _event: &LifecycleEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed() -> LifecycleEvent {
        LifecycleEvent::Completed {
            execution_id: Uuid::new_v4(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new(4);
        let event = completed();
        sink.notify(&event);
        assert_eq!(rx.recv().await, Some(event));
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.notify(&completed());
        sink.notify(&completed());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let (a, mut rx_a) = ChannelSink::new(2);
        let (b, mut rx_b) = ChannelSink::new(2);
        let fanout = FanoutSink::new(vec![Arc::new(a), Arc::new(b)]).with(Arc::new(NullSink));
        fanout.notify(&completed());
        assert_eq!(rx_a.recv().await.map(|e| e.name()), Some("completed"));
        assert_eq!(rx_b.recv().await.map(|e| e.name()), Some("completed"));
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = LifecycleEvent::Paused {
            execution_id: Uuid::nil(),
            wave_number: 1,
            pause_token: "pt-1".to_string(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "paused");
        assert_eq!(json["wave_number"], 1);
    }
}
