//! Domain types for the stagehand orchestrator.
//!
//! This module contains the core data structures:
//! - Request: Parsed request payloads
//! - Delta: Session state log entries
//! - DecisionToken: Decision gate output
//! - Response: Orchestrator results
//! - RunEvent: Journal records

pub mod decision;
pub mod delta;
pub mod events;
pub mod request;
pub mod response;

// Re-export commonly used types
pub use decision::DecisionToken;
pub use delta::Delta;
pub use events::{RunEvent, RunEventType};
pub use request::{ParsedRequest, Request};
pub use response::{Response, ResponseKind, ESCALATION_PREFIX, NO_RESPONSE};
