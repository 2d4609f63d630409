//! Lifecycle events published by the engine.
//!
//! Events go out on a `tokio::sync::broadcast` channel. Publishing never
//! blocks and never fails when nobody is listening; slow subscribers see
//! `RecvError::Lagged` and skip ahead.

use crate::context::ContextState;
use serde::Serialize;
use strum::Display;
use task_core::{BackendKind, TaskErrorKind, TaskType};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// The backend cannot perform this task type.
    Unsupported,
    /// A credential the backend needs is not configured.
    MissingCredential,
    /// Turned off in configuration.
    Disabled
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvictionReason {
    Budget,
    Expired
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    ContextStateChanged {
        from: ContextState,
        to: ContextState,
        generation: u64
    },
    /// A context became ready. `reused` is set when the platform reported an
    /// existing context instead of creating a new one.
    ContextCreated {
        generation: u64,
        reused: bool
    },
    ContextCrashed {
        generation: u64,
        reason: String
    },
    BackendSkipped {
        backend: BackendKind,
        task_type: TaskType,
        reason: SkipReason
    },
    BackendFailed {
        backend: BackendKind,
        task_type: TaskType,
        kind: TaskErrorKind,
        attempts: u32
    },
    CacheEvicted {
        key: String,
        size_bytes: usize,
        reason: EvictionReason
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        tracing::trace!(?event, "engine event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::BackendSkipped {
            backend: BackendKind::Cloud,
            task_type: TaskType::Translate,
            reason: SkipReason::MissingCredential
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            EngineEvent::BackendSkipped {
                reason: SkipReason::MissingCredential,
                ..
            }
        ));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.publish(EngineEvent::ContextCrashed {
            generation: 1,
            reason: "gone".to_string()
        });
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(EngineEvent::CacheEvicted {
            key: "k".to_string(),
            size_bytes: 12,
            reason: EvictionReason::Budget
        })
        .unwrap();

        assert_eq!(json["event"], "cache_evicted");
        assert_eq!(json["sizeBytes"], 12);
        assert_eq!(json["reason"], "budget");
    }
}
