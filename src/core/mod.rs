//! Core orchestration logic.
//!
//! This module contains:
//! - Stage: the stage contract, leaf stages, and composites
//! - Cache: hashed response cache over pluggable stores
//! - Session: per-chain delta log
//! - Orchestrator: main execution engine
//! - Pipeline: YAML definitions and graph building
//! - Journal: append-only run log

pub mod agent;
pub mod cache;
pub mod composite;
pub mod gate;
pub mod journal;
pub mod limits;
pub mod orchestrator;
pub mod pipeline;
pub mod request;
pub mod session;
pub mod stage;

// Re-export commonly used types
pub use agent::AgentStage;
pub use cache::{hash_key, prompt_cache_key, Cache, CacheStore, CacheTicket, FileStore, MemoryStore};
pub use composite::{Parallel, Router, Sequential};
pub use gate::{read_decision, DecisionGate};
pub use journal::Journal;
pub use limits::{LimitViolation, StageLimits};
pub use orchestrator::Orchestrator;
pub use pipeline::{PipelineDef, StageGraph, StageSpec};
pub use request::{apply_request, parse_request};
pub use session::{keys, SessionState};
pub use stage::{FnStage, Outcome, SharedStage, Stage, StageError, NO_CONTRIBUTION};
