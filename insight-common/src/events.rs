//! Event types for the insight pipeline
//!
//! Provides the shared event definitions and the EventBus used to stream pipeline
//! progress to SSE clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InsightEvent {
    /// Orchestrated run started (or resumed)
    PipelineStarted {
        config_id: Uuid,
        /// Last completed state at start (`None` for a fresh run)
        resumed_from: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A phase began executing
    PhaseStarted {
        config_id: Uuid,
        phase: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Item-level progress inside a phase
    PhaseProgress {
        config_id: Uuid,
        phase: String,
        completed: usize,
        total: usize,
        failed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A phase persisted its output
    PhaseCompleted {
        config_id: Uuid,
        phase: String,
        error_count: usize,
        warning_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Orchestrated run reached its final state
    PipelineCompleted {
        config_id: Uuid,
        duration_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Orchestrated run halted on a fatal phase error
    PipelineFailed {
        config_id: Uuid,
        phase: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Orchestrated run cancelled by the caller
    PipelineCancelled {
        config_id: Uuid,
        phase: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl InsightEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            InsightEvent::PipelineStarted { .. } => "PipelineStarted",
            InsightEvent::PhaseStarted { .. } => "PhaseStarted",
            InsightEvent::PhaseProgress { .. } => "PhaseProgress",
            InsightEvent::PhaseCompleted { .. } => "PhaseCompleted",
            InsightEvent::PipelineCompleted { .. } => "PipelineCompleted",
            InsightEvent::PipelineFailed { .. } => "PipelineFailed",
            InsightEvent::PipelineCancelled { .. } => "PipelineCancelled",
        }
    }

    pub fn config_id(&self) -> Uuid {
        match self {
            InsightEvent::PipelineStarted { config_id, .. }
            | InsightEvent::PhaseStarted { config_id, .. }
            | InsightEvent::PhaseProgress { config_id, .. }
            | InsightEvent::PhaseCompleted { config_id, .. }
            | InsightEvent::PipelineCompleted { config_id, .. }
            | InsightEvent::PipelineFailed { config_id, .. }
            | InsightEvent::PipelineCancelled { config_id, .. } => *config_id,
        }
    }
}

/// Broadcast bus for pipeline events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<InsightEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers drop old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<InsightEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: InsightEvent,
    ) -> Result<usize, broadcast::error::SendError<InsightEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: InsightEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let config_id = Uuid::new_v4();

        bus.emit_lossy(InsightEvent::PhaseStarted {
            config_id,
            phase: "features_extracted".to_string(),
            timestamp: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "PhaseStarted");
        assert_eq!(event.config_id(), config_id);
    }

    #[test]
    fn emit_without_subscribers_fails_but_lossy_does_not_panic() {
        let bus = EventBus::new(4);
        let event = InsightEvent::PipelineCompleted {
            config_id: Uuid::new_v4(),
            duration_seconds: 1,
            timestamp: chrono::Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = InsightEvent::PipelineFailed {
            config_id: Uuid::nil(),
            phase: "categories_discovered".to_string(),
            error: "oracle unavailable".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PipelineFailed");
        assert_eq!(json["phase"], "categories_discovered");
    }
}
