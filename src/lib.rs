//! stagehand - Multi-stage agent orchestrator with response caching
//!
//! Requests flow through a tree of stages (adapter-backed leaves plus
//! sequential, parallel, and router composites) until a terminal stage
//! answers. A decision gate may mark a request cacheable, in which case
//! responses are served from and written to a hashed response cache.
//!
//! # Architecture
//!
//! - Each request chain owns a session: an append-only delta log that
//!   stages read from and publish to
//! - The cache is an explicit shared handle; stale writes racing an
//!   invalidation are dropped
//! - Every run can be traced in a JSONL journal
//!
//! # Modules
//!
//! - `adapters`: Content generation backends (external command, static)
//! - `core`: Stages, composites, cache, session, orchestrator, pipelines
//! - `domain`: Data structures (Request, Delta, Response, RunEvent)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a pipeline
//! stagehand run webpage '{"id": "c1", "prompt": "Add a pricing table"}'
//!
//! # Compute the cache key for a prompt
//! stagehand hash "Add a pricing table"
//!
//! # Drop a cached response
//! stagehand invalidate <key>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{Adapter, AdapterRegistry, AdapterType, CommandAdapter, StaticAdapter};
pub use crate::core::{Cache, Orchestrator, PipelineDef, SessionState, Stage, StageError};
pub use domain::{DecisionToken, Request, Response, ResponseKind};
