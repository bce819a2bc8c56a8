//! Main orchestrator for request execution.
//!
//! Coordinates request parsing, the decision gate, cache lookups and
//! writes, the stage graph walk, and journaling.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{DecisionToken, Response, ResponseKind, RunEvent, RunEventType};

use super::cache::{prompt_cache_key, Cache, CacheTicket};
use super::gate::{read_decision, DecisionGate};
use super::journal::Journal;
use super::pipeline::StageGraph;
use super::request::apply_request;
use super::session::{keys, SessionState};
use super::stage::{Outcome, SharedStage};

/// Request orchestrator over one stage graph
pub struct Orchestrator {
    /// Root of the stage graph
    root: SharedStage,

    /// Classifies requests as live or cacheable
    gate: Option<DecisionGate>,

    /// Shared response cache
    cache: Arc<Cache>,

    /// Values written into every new session
    seed: Vec<(String, String)>,

    /// Optional run journal
    journal: Option<Journal>,
}

impl Orchestrator {
    /// Create an orchestrator with no gate (every request runs live)
    pub fn new(root: SharedStage, cache: Arc<Cache>) -> Self {
        Self {
            root,
            gate: None,
            cache,
            seed: Vec::new(),
            journal: None,
        }
    }

    /// Create an orchestrator from a built pipeline graph
    pub fn from_graph(graph: StageGraph, cache: Arc<Cache>) -> Self {
        let orchestrator = Self::new(graph.root, cache);
        match graph.gate {
            Some(gate) => orchestrator.with_gate(gate),
            None => orchestrator,
        }
    }

    pub fn with_gate(mut self, gate: DecisionGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Seed a session value for every run
    pub fn with_seed(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.seed.push((key.into(), value.into()));
        self
    }

    /// Seed the root prompt that prefixes every cache key
    pub fn with_root_prompt(self, root_prompt: impl Into<String>) -> Self {
        self.with_seed(keys::ROOT_PROMPT, root_prompt)
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn root(&self) -> &SharedStage {
        &self.root
    }

    /// Fresh session with the configured seed values
    pub fn new_session(&self, session_id: impl Into<String>) -> SessionState {
        let session = SessionState::new(session_id);
        for (key, value) in &self.seed {
            session.append(key.as_str(), value.as_str());
        }
        session
    }

    /// Handle a raw request in a fresh session
    pub async fn run(&self, raw: &str, session_id: &str) -> Result<Response> {
        self.run_in_session(raw, self.new_session(session_id)).await
    }

    /// Handle a raw request in a caller-prepared session.
    ///
    /// The session is consumed; it ends with the request chain.
    #[instrument(skip_all, fields(session_id = %session.session_id()))]
    pub async fn run_in_session(&self, raw: &str, session: SessionState) -> Result<Response> {
        let started = Instant::now();
        let state = Arc::new(session);
        let session_id = state.session_id().to_string();

        self.record(RunEvent::new(&session_id, RunEventType::RunStarted, "Request received"))
            .await;

        // Parse and apply side effects before anything can read the cache
        let parsed = apply_request(raw, &state, &self.cache).await;
        let prompt = parsed.effective_prompt().to_string();
        state.append(keys::CURRENT_PROMPT, prompt.as_str());

        if let Some(gate) = &self.gate {
            gate.decide(&prompt, &state).await;
        }
        let token = read_decision(&state);

        let root_prompt = state.get(keys::ROOT_PROMPT).unwrap_or_default();
        let key = prompt_cache_key(&root_prompt, &prompt);
        state.append(keys::CURRENT_PROMPT_HASH, key.as_str());

        self.record(
            RunEvent::new(&session_id, RunEventType::DecisionMade, format!("Decision: {}", token))
                .with_cache_key(&key),
        )
        .await;

        let ticket = self.cache.ticket();

        if token == DecisionToken::Cache {
            if let Some(hit) = self.lookup(&key).await {
                info!(%key, "Serving response from cache");
                self.record(
                    RunEvent::new(&session_id, RunEventType::CacheHit, "Served from cache")
                        .with_cache_key(&key)
                        .with_duration(started.elapsed().as_millis() as u64),
                )
                .await;
                return Ok(Response::cached(session_id, hit, key));
            }
            debug!(%key, "Cache miss");
        }

        info!(root = self.root.name(), %token, "Walking stage graph");
        let response = match self.root.run(&prompt, &state).await {
            Ok(Outcome::Final { stage, content }) => Response::final_output(&session_id, stage, content, &key),
            Ok(_) => {
                warn!("Stage graph finished without a terminal stage");
                Response::no_response(&session_id, &key)
            }
            Err(e) => {
                error!(stage = e.stage(), error = %e, "Stage escalated");
                Response::escalated(&session_id, Some(e.stage().to_string()), &e.to_string(), &key)
            }
        };

        if token == DecisionToken::Cache && response.kind == ResponseKind::Final {
            self.store(&session_id, &key, &response.text, ticket).await;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let finished = match response.kind {
            ResponseKind::Escalated => RunEvent::new(&session_id, RunEventType::RunEscalated, "Run escalated")
                .with_error(response.text.clone()),
            _ => RunEvent::new(&session_id, RunEventType::RunCompleted, format!("Run finished: {:?}", response.kind)),
        };
        let finished = match &response.terminal_stage {
            Some(stage) => finished.with_stage(stage),
            None => finished,
        };
        self.record(finished.with_cache_key(&key).with_duration(duration_ms))
            .await;

        info!(kind = ?response.kind, duration_ms, "Run finished");
        Ok(response)
    }

    /// Cached value for `key`; store failures count as misses
    async fn lookup(&self, key: &str) -> Option<String> {
        match self.cache.exists(key).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(%key, error = %e, "Cache lookup failed, treating as miss");
                return None;
            }
        }

        match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(%key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, session_id: &str, key: &str, value: &str, ticket: CacheTicket) {
        match self.cache.set_if_fresh(key, value, ticket).await {
            Ok(true) => {
                debug!(%key, "Stored response in cache");
                self.record(RunEvent::new(session_id, RunEventType::CacheStored, "Stored in cache").with_cache_key(key))
                    .await;
            }
            Ok(false) => debug!(%key, "Key invalidated during run; response not cached"),
            Err(e) => warn!(%key, error = %e, "Cache write failed"),
        }
    }

    /// Journal an event; journal failures never fail the run
    async fn record(&self, event: RunEvent) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&event).await {
                warn!(event_type = ?event.event_type, error = %e, "Failed to journal run event");
            }
        }
    }
}
