//! Live engine events, fan-out over a broadcast channel.
//!
//! Events are serialized once on publish and delivered as JSON text, the
//! form the `/ws` endpoint forwards to clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::models::{ImprovementJob, Iteration, JobStatus, Phase, Session, SessionStatus};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    SessionStarted {
        session: Session,
    },
    PhaseChanged {
        session_id: String,
        iteration: u32,
        phase: Phase,
    },
    IterationRecorded {
        iteration: Iteration,
    },
    SessionFinished {
        session_id: String,
        status: SessionStatus,
        attempted: u32,
        succeeded: u32,
    },
    JobsCreated {
        job_ids: Vec<String>,
    },
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
    },
    JobArchived {
        job_id: String,
    },
}

impl EngineEvent {
    pub fn job_status(job: &ImprovementJob) -> Self {
        Self::JobStatusChanged {
            job_id: job.id.clone(),
            status: job.status,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<String>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn sender(&self) -> broadcast::Sender<String> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Serialize and broadcast. Having no subscribers is not an error.
    pub fn publish(&self, event: &EngineEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => warn!(error = %e, "Failed to serialize engine event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = EngineEvent::PhaseChanged {
            session_id: "s1".into(),
            iteration: 2,
            phase: Phase::CouncilReview,
        };
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PhaseChanged");
        assert_eq!(json["data"]["phase"], "council_review");
        assert_eq!(json["data"]["iteration"], 2);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(&EngineEvent::JobArchived {
            job_id: "j1".into(),
        });
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("JobArchived"));
        assert!(msg.contains("j1"));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(&EngineEvent::JobsCreated { job_ids: vec![] });
    }
}
