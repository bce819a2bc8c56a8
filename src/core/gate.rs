//! The decision gate: may this request be served from cache?

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::DecisionToken;

use super::session::{keys, SessionState};
use super::stage::{FnStage, SharedStage};

/// Wraps a classifier stage whose output is `LIVE` or `CACHE`.
///
/// The token is written to session state; only the orchestrator reads it.
/// Anything the classifier says besides those two tokens, and any failure,
/// counts as `LIVE`.
pub struct DecisionGate {
    stage: SharedStage,
}

impl DecisionGate {
    pub fn new(stage: SharedStage) -> Self {
        Self { stage }
    }

    /// Gate that always answers `token`
    pub fn fixed(token: DecisionToken) -> Self {
        Self::new(FnStage::constant("fixed_gate", token.as_str()).shared())
    }

    pub fn name(&self) -> &str {
        self.stage.name()
    }

    /// Classify `prompt` and record the token in `state`
    pub async fn decide(&self, prompt: &str, state: &Arc<SessionState>) -> DecisionToken {
        let token = match self.stage.run(prompt, state).await {
            Ok(outcome) => match outcome.contribution() {
                Some(raw) => DecisionToken::parse(raw).unwrap_or_else(|| {
                    warn!(gate = self.name(), token = %raw.trim(), "Unrecognized decision token, running live");
                    DecisionToken::Live
                }),
                None => DecisionToken::Live,
            },
            Err(e) => {
                warn!(gate = self.name(), error = %e, "Decision gate failed, running live");
                DecisionToken::Live
            }
        };

        debug!(gate = self.name(), %token, "Decision made");
        state.append(keys::DECISION_TOKEN, token.as_str());
        token
    }
}

/// Token recorded in `state`; `LIVE` when absent or unrecognized
pub fn read_decision(state: &SessionState) -> DecisionToken {
    state
        .get(keys::DECISION_TOKEN)
        .and_then(|raw| DecisionToken::parse(&raw))
        .unwrap_or_default()
}
