//! Orchestrator responses.

use serde::{Deserialize, Serialize};

/// Prefix of the text returned when a stage escalates
pub const ESCALATION_PREFIX: &str = "Agent escalated: ";

/// Text returned when the walk ends without reaching a terminal stage
pub const NO_RESPONSE: &str = "Agent did not produce a final response.";

/// How a response was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// A terminal stage produced the output
    Final,

    /// Served from cache without running any stage
    CacheHit,

    /// A stage escalated; the text describes why
    Escalated,

    /// No terminal stage was reached
    NoResponse,
}

/// The final result of one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub session_id: String,
    pub text: String,
    pub kind: ResponseKind,

    /// Stage whose output is authoritative (terminal or escalating stage)
    pub terminal_stage: Option<String>,

    /// Cache key computed for this request
    pub cache_key: String,
}

impl Response {
    pub fn final_output(
        session_id: impl Into<String>,
        stage: impl Into<String>,
        text: impl Into<String>,
        cache_key: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            kind: ResponseKind::Final,
            terminal_stage: Some(stage.into()),
            cache_key: cache_key.into(),
        }
    }

    pub fn cached(session_id: impl Into<String>, text: impl Into<String>, cache_key: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            text: text.into(),
            kind: ResponseKind::CacheHit,
            terminal_stage: None,
            cache_key: cache_key.into(),
        }
    }

    pub fn escalated(
        session_id: impl Into<String>,
        stage: Option<String>,
        message: &str,
        cache_key: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            text: format!("{}{}", ESCALATION_PREFIX, message),
            kind: ResponseKind::Escalated,
            terminal_stage: stage,
            cache_key: cache_key.into(),
        }
    }

    pub fn no_response(session_id: impl Into<String>, cache_key: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            text: NO_RESPONSE.to_string(),
            kind: ResponseKind::NoResponse,
            terminal_stage: None,
            cache_key: cache_key.into(),
        }
    }

    pub fn cache_hit(&self) -> bool {
        self.kind == ResponseKind::CacheHit
    }
}
