//! Journal events for orchestrator runs.
//!
//! Every run appends a handful of immutable events to its session journal.
//! The journal is a trace for inspection; nothing replays it to rebuild
//! engine state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in a session journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The session (request chain) this event belongs to
    pub session_id: String,

    /// Type of event
    pub event_type: RunEventType,

    /// Human-readable summary (never the full response body)
    pub summary: String,

    /// Stage involved, if any (terminal stage on completion)
    pub stage: Option<String>,

    /// Cache key of the request being handled
    pub cache_key: Option<String>,

    /// Time taken in milliseconds (for finished runs)
    pub duration_ms: Option<u64>,

    /// Error message for escalated runs
    pub error: Option<String>,
}

impl RunEvent {
    /// Create a new event with the current timestamp
    pub fn new(session_id: impl Into<String>, event_type: RunEventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            event_type,
            summary: summary.into(),
            stage: None,
            cache_key: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    /// A request entered the orchestrator
    RunStarted,

    /// The decision gate produced a token
    DecisionMade,

    /// The response was served from cache
    CacheHit,

    /// The response was written to cache
    CacheStored,

    /// The stage graph finished and produced a response
    RunCompleted,

    /// A stage escalated and the chain was cut short
    RunEscalated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = RunEvent::new("s1", RunEventType::RunCompleted, "done")
            .with_stage("merger")
            .with_duration(12);

        assert_eq!(event.session_id, "s1");
        assert_eq!(event.stage.as_deref(), Some("merger"));
        assert_eq!(event.duration_ms, Some(12));
        assert!(event.error.is_none());
    }

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&RunEventType::CacheHit).unwrap();
        assert_eq!(json, "\"cache_hit\"");
    }
}
