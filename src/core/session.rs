//! Per-request-chain session state.
//!
//! State is an append-only log of key/value deltas. Reads go through a
//! last-write-wins materialization, so the log can be replayed
//! deterministically from a snapshot of its deltas.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::domain::Delta;

/// Reserved state keys shared between the orchestrator and stages.
pub mod keys {
    /// The page-level prompt the request belongs to; prefixes the cache key
    pub const ROOT_PROMPT: &str = "root_prompt";

    /// Effective prompt of the request currently being handled
    pub const CURRENT_PROMPT: &str = "current_prompt";

    /// Cache key of the request currently being handled
    pub const CURRENT_PROMPT_HASH: &str = "current_prompt_hash";

    /// Styling guidance stages may interpolate into their instructions
    pub const STYLING_INSTRUCTIONS: &str = "styling_instructions";

    /// Decision gate output; read only by the orchestrator
    pub const DECISION_TOKEN: &str = "decision_token";

    /// Prefix of component prompt entries written by the request parser
    pub const COMPONENT_PREFIX: &str = "component:";

    /// State key for a component's prompt
    pub fn component(id: &str) -> String {
        format!("{}{}", COMPONENT_PREFIX, id)
    }
}

#[derive(Debug, Default)]
struct DeltaLog {
    deltas: Vec<Delta>,
    next_seq: u64,
}

/// Session state for one request chain.
///
/// Shared by reference (`Arc<SessionState>`) with every stage in the chain.
/// Appends are serialized, so concurrent branches never lose a write.
#[derive(Debug)]
pub struct SessionState {
    session_id: String,
    log: Mutex<DeltaLog>,
}

impl SessionState {
    /// Create an empty session
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            log: Mutex::new(DeltaLog::default()),
        }
    }

    /// Rebuild a session from a previously captured delta log
    pub fn replay(session_id: impl Into<String>, deltas: Vec<Delta>) -> Self {
        let next_seq = deltas.iter().map(|d| d.seq + 1).max().unwrap_or(0);
        Self {
            session_id: session_id.into(),
            log: Mutex::new(DeltaLog { deltas, next_seq }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append a delta stamped with the current time
    pub fn append(&self, key: impl Into<String>, value: impl Into<String>) {
        self.append_at(key, value, Utc::now());
    }

    /// Append a delta with an explicit timestamp
    pub fn append_at(&self, key: impl Into<String>, value: impl Into<String>, timestamp: DateTime<Utc>) {
        let mut log = self.lock();
        let seq = log.next_seq;
        log.next_seq += 1;
        log.deltas.push(Delta {
            key: key.into(),
            value: value.into(),
            timestamp,
            seq,
        });
    }

    /// Current value of `key`, if it was ever written
    pub fn get(&self, key: &str) -> Option<String> {
        let log = self.lock();
        let mut winner: Option<&Delta> = None;
        for delta in log.deltas.iter().filter(|d| d.key == key) {
            if winner.map_or(true, |w| delta.supersedes(w)) {
                winner = Some(delta);
            }
        }
        winner.map(|d| d.value.clone())
    }

    /// Last-write-wins view of the whole log
    pub fn materialize(&self) -> HashMap<String, String> {
        materialize(&self.lock().deltas)
    }

    /// Snapshot of the log in append order
    pub fn deltas(&self) -> Vec<Delta> {
        self.lock().deltas.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, DeltaLog> {
        // The only mutation is a push, so a poisoned log is still consistent
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve a delta log into its last-write-wins view
pub fn materialize(deltas: &[Delta]) -> HashMap<String, String> {
    let mut winners: HashMap<&str, &Delta> = HashMap::new();
    for delta in deltas {
        match winners.get(delta.key.as_str()) {
            Some(current) if !delta.supersedes(current) => {}
            _ => {
                winners.insert(delta.key.as_str(), delta);
            }
        }
    }

    winners
        .into_iter()
        .map(|(key, delta)| (key.to_string(), delta.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_last_write_wins() {
        let state = SessionState::new("s1");
        state.append("color", "red");
        state.append("color", "blue");
        state.append("size", "L");

        assert_eq!(state.get("color").as_deref(), Some("blue"));
        assert_eq!(state.len(), 3);

        let view = state.materialize();
        assert_eq!(view.len(), 2);
        assert_eq!(view["color"], "blue");
    }

    #[test]
    fn test_greatest_timestamp_wins_over_append_order() {
        let state = SessionState::new("s1");
        let now = Utc::now();
        state.append_at("k", "newer", now);
        state.append_at("k", "older", now - Duration::seconds(5));

        assert_eq!(state.get("k").as_deref(), Some("newer"));
        assert_eq!(state.materialize()["k"], "newer");
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_sequence() {
        let state = SessionState::new("s1");
        let now = Utc::now();
        state.append_at("k", "first", now);
        state.append_at("k", "second", now);

        assert_eq!(state.get("k").as_deref(), Some("second"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let state = SessionState::new("s1");
        assert!(state.get(keys::DECISION_TOKEN).is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn test_replay_matches_original_view() {
        let state = SessionState::new("s1");
        state.append(keys::component("c1"), "Generate X");
        state.append(keys::ROOT_PROMPT, "calm page");
        state.append(keys::component("c1"), "Generate Y");

        let replayed = SessionState::replay("s1", state.deltas());
        assert_eq!(replayed.materialize(), state.materialize());

        // Appends after replay keep sequencing monotonic
        replayed.append("extra", "1");
        let seqs: Vec<u64> = replayed.deltas().iter().map(|d| d.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let state = Arc::new(SessionState::new("s1"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        state.append(format!("t{}", t), i.to_string());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(state.len(), 400);
        let view = state.materialize();
        for t in 0..8 {
            assert_eq!(view[&format!("t{}", t)], "49");
        }
    }

    #[test]
    fn test_component_key() {
        assert_eq!(keys::component("c1"), "component:c1");
    }
}
