use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{QueueCounts, QueueState};

/// Emitted whenever the queue record or the counters change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangedEvent {
    pub state: QueueState,
    pub counts: QueueCounts,
}

/// Emitted when an item is handed to the page agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStartedEvent {
    pub item_id: String,
}

/// Emitted when the page reports an item finished generating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCompletedEvent {
    pub item_id: String,
    pub duration_ms: Option<i64>,
}

/// Emitted when an item fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailedEvent {
    pub item_id: String,
    pub error: String,
}

/// Emitted when a rate limit or an unreachable agent stops the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHaltedEvent {
    pub reason: String,
}

/// Emitted after an auto-generated batch is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGeneratedEvent {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    StateChanged(StateChangedEvent),
    ItemStarted(ItemStartedEvent),
    ItemCompleted(ItemCompletedEvent),
    ItemFailed(ItemFailedEvent),
    QueueHalted(QueueHaltedEvent),
    BatchGenerated(BatchGeneratedEvent),
}

impl QueueEvent {
    /// Event name used on the frontend bus.
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::StateChanged(_) => "queue:state_changed",
            QueueEvent::ItemStarted(_) => "queue:item_started",
            QueueEvent::ItemCompleted(_) => "queue:item_completed",
            QueueEvent::ItemFailed(_) => "queue:item_failed",
            QueueEvent::QueueHalted(_) => "queue:halted",
            QueueEvent::BatchGenerated(_) => "queue:batch_generated",
        }
    }

    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            QueueEvent::StateChanged(e) => serde_json::to_value(e),
            QueueEvent::ItemStarted(e) => serde_json::to_value(e),
            QueueEvent::ItemCompleted(e) => serde_json::to_value(e),
            QueueEvent::ItemFailed(e) => serde_json::to_value(e),
            QueueEvent::QueueHalted(e) => serde_json::to_value(e),
            QueueEvent::BatchGenerated(e) => serde_json::to_value(e),
        }
    }
}

/// Where the orchestrator publishes its events. Emission is best-effort.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &QueueEvent) -> crate::Result<()>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &QueueEvent) -> crate::Result<()> {
        Ok(())
    }
}

/// Fans events out to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<QueueEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &QueueEvent) -> crate::Result<()> {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

#[cfg(feature = "tauri")]
impl<R: tauri::Runtime> EventSink for tauri::AppHandle<R> {
    fn emit(&self, event: &QueueEvent) -> crate::Result<()> {
        use tauri::Emitter;
        let payload = event.payload()?;
        Emitter::emit(self, event.name(), payload)
            .map_err(|e| crate::QueueError::Event(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_camel_case() {
        let event = QueueEvent::ItemCompleted(ItemCompletedEvent {
            item_id: "p1".into(),
            duration_ms: Some(1200),
        });
        assert_eq!(event.name(), "queue:item_completed");
        let payload = event.payload().unwrap();
        assert_eq!(payload["itemId"], "p1");
        assert_eq!(payload["durationMs"], 1200);
    }

    #[test]
    fn test_state_payload_nests_counts() {
        let event = QueueEvent::StateChanged(StateChangedEvent {
            state: QueueState::default(),
            counts: QueueCounts {
                total: 2,
                pending: 2,
                ..QueueCounts::default()
            },
        });
        let payload = event.payload().unwrap();
        assert_eq!(payload["state"]["isRunning"], false);
        assert_eq!(payload["counts"]["pending"], 2);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let sink = BroadcastSink::new(8);
        let halted = QueueEvent::QueueHalted(QueueHaltedEvent {
            reason: "Try later".into(),
        });
        // Sending before anyone subscribes is fine.
        sink.emit(&halted).unwrap();

        let mut rx = sink.subscribe();
        sink.emit(&halted).unwrap();
        assert_eq!(rx.recv().await.unwrap(), halted);
    }
}
