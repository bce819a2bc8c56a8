//! The stage abstraction.
//!
//! A stage turns an input string into an [`Outcome`], reading and appending
//! session state along the way. Leaves produce content; composites (see
//! [`super::composite`]) arrange other stages.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::session::SessionState;

/// Output meaning "nothing to add"; never forwarded into a response
pub const NO_CONTRIBUTION: &str = "NO_CONTRIBUTION";

/// Output prefix a content generator uses to escalate
pub const ESCALATION_MARKER: &str = "ESCALATE:";

/// What a stage produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Intermediate output, fed to the next stage
    Output(String),

    /// The stage had nothing to add
    NoContribution,

    /// Authoritative output of a terminal stage; ends the chain
    Final { stage: String, content: String },
}

impl Outcome {
    /// The produced text, if any
    pub fn contribution(&self) -> Option<&str> {
        match self {
            Self::Output(text) => Some(text),
            Self::Final { content, .. } => Some(content),
            Self::NoContribution => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

/// Stage failures. Both variants end the chain they occur in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The stage cannot complete; the message is shown to the user
    #[error("{message}")]
    Escalation { stage: String, message: String },

    /// Unrecoverable failure (adapter error, limit violation, panic)
    #[error("stage '{stage}' failed: {reason}")]
    Failed { stage: String, reason: String },
}

impl StageError {
    pub fn escalate(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Escalation {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn failed(stage: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Failed {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the stage that raised the error
    pub fn stage(&self) -> &str {
        match self {
            Self::Escalation { stage, .. } | Self::Failed { stage, .. } => stage,
        }
    }
}

/// A unit of request processing.
///
/// A stage that declares an [`output_key`](Stage::output_key) publishes its
/// contribution to that session key itself (an empty string when it has no
/// contribution).
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name
    fn name(&self) -> &str;

    /// Session key this stage publishes its output to
    fn output_key(&self) -> Option<&str> {
        None
    }

    /// Whether this stage's output is authoritative for the whole chain
    fn is_terminal(&self) -> bool {
        false
    }

    async fn run(&self, input: &str, state: &Arc<SessionState>) -> Result<Outcome, StageError>;
}

/// Shared, type-erased stage
pub type SharedStage = Arc<dyn Stage>;

/// Identity shared by leaf stages
#[derive(Debug, Clone, Default)]
pub struct StageMeta {
    pub name: String,
    pub output_key: Option<String>,
    pub terminal: bool,

    /// Stage-specific "no contribution" token, in addition to [`NO_CONTRIBUTION`]
    pub skip_token: Option<String>,
}

impl StageMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Turn raw generated text into an outcome, publishing to the output slot
    pub fn settle(&self, text: String, state: &SessionState) -> Result<Outcome, StageError> {
        if let Some(message) = text.trim_start().strip_prefix(ESCALATION_MARKER) {
            return Err(StageError::escalate(&self.name, message.trim()));
        }

        if is_no_contribution(&text, self.skip_token.as_deref()) {
            if let Some(key) = &self.output_key {
                state.append(key.as_str(), "");
            }
            return Ok(Outcome::NoContribution);
        }

        if let Some(key) = &self.output_key {
            state.append(key.as_str(), text.as_str());
        }

        if self.terminal {
            Ok(Outcome::Final {
                stage: self.name.clone(),
                content: text,
            })
        } else {
            Ok(Outcome::Output(text))
        }
    }
}

/// Whether `text` is a no-contribution sentinel
pub fn is_no_contribution(text: &str, skip_token: Option<&str>) -> bool {
    let trimmed = text.trim();
    trimmed == NO_CONTRIBUTION || skip_token.is_some_and(|token| trimmed == token)
}

/// Replace `{key}` placeholders with values from `values`.
///
/// Keys missing from `values` render as empty. Braces that do not enclose a
/// plain identifier (CSS, JSON, JS bodies) are copied through untouched.
pub fn render_template(template: &str, values: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find('}') {
            Some(close) if is_placeholder(&after[..close]) => {
                if let Some(value) = values.get(&after[..close]) {
                    out.push_str(value);
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_placeholder(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'))
}

/// Strip a surrounding markdown code fence (```` ```html ```` ... ```` ``` ````)
pub fn strip_code_fence(text: &str) -> String {
    let mut body = text.trim();

    if let Some(after) = body.strip_prefix("```") {
        body = match after.find('\n') {
            // Drop the first line only when it is a bare language tag
            Some(newline) if is_fence_tag(&after[..newline]) => &after[newline + 1..],
            Some(_) => after,
            None => after.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }

    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

fn is_fence_tag(line: &str) -> bool {
    line.trim_end()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}

type StageFuture = Pin<Box<dyn Future<Output = Result<String, StageError>> + Send>>;
type StageFn = dyn Fn(String, Arc<SessionState>) -> StageFuture + Send + Sync;

/// Closure-backed leaf stage
pub struct FnStage {
    meta: StageMeta,
    f: Box<StageFn>,
}

impl FnStage {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String, Arc<SessionState>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, StageError>> + Send + 'static,
    {
        Self {
            meta: StageMeta::new(name),
            f: Box::new(move |input, state| Box::pin(f(input, state))),
        }
    }

    /// Stage that always returns `text`
    pub fn constant(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(name, move |_, _| {
            let text = text.clone();
            async move { Ok(text) }
        })
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.meta.output_key = Some(key.into());
        self
    }

    pub fn with_skip_token(mut self, token: impl Into<String>) -> Self {
        self.meta.skip_token = Some(token.into());
        self
    }

    pub fn terminal(mut self) -> Self {
        self.meta.terminal = true;
        self
    }

    pub fn shared(self) -> SharedStage {
        Arc::new(self)
    }
}

#[async_trait]
impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn output_key(&self) -> Option<&str> {
        self.meta.output_key.as_deref()
    }

    fn is_terminal(&self) -> bool {
        self.meta.terminal
    }

    async fn run(&self, input: &str, state: &Arc<SessionState>) -> Result<Outcome, StageError> {
        let text = (self.f)(input.to_string(), Arc::clone(state)).await?;
        self.meta.settle(text, state)
    }
}
