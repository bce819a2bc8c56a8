//! Adapter-backed leaf stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::adapters::Adapter;

use super::limits::StageLimits;
use super::session::SessionState;
use super::stage::{render_template, strip_code_fence, Outcome, Stage, StageError, StageMeta};

/// A stage whose content comes from an [`Adapter`].
///
/// The instruction template is rendered against the session's materialized
/// state, so it can reference slots published by earlier stages
/// (`{table_output}`) or seeded values (`{styling_instructions}`).
pub struct AgentStage {
    meta: StageMeta,
    adapter: Arc<dyn Adapter>,
    action: String,
    instruction: Option<String>,
    strip_fences: bool,
    limits: StageLimits,
    timeout: Duration,
}

impl AgentStage {
    pub fn new(name: impl Into<String>, adapter: Arc<dyn Adapter>, action: impl Into<String>) -> Self {
        let limits = StageLimits::default();
        Self {
            meta: StageMeta::new(name),
            adapter,
            action: action.into(),
            instruction: None,
            strip_fences: false,
            timeout: limits.timeout(None),
            limits,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.meta.output_key = Some(key.into());
        self
    }

    pub fn with_skip_token(mut self, token: impl Into<String>) -> Self {
        self.meta.skip_token = Some(token.into());
        self
    }

    /// Mark this stage's output as authoritative for the chain
    pub fn terminal(mut self) -> Self {
        self.meta.terminal = true;
        self
    }

    /// Strip markdown code fences from generated output
    pub fn strip_fences(mut self, strip: bool) -> Self {
        self.strip_fences = strip;
        self
    }

    /// Apply limits; `timeout_override` takes precedence over the limit's timeout
    pub fn with_limits(mut self, limits: StageLimits, timeout_override: Option<u64>) -> Self {
        self.timeout = limits.timeout(timeout_override);
        self.limits = limits;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Text sent to the adapter: rendered instruction, then the input
    pub fn compose_prompt(&self, input: &str, state: &SessionState) -> String {
        match &self.instruction {
            Some(template) => {
                let instruction = render_template(template, &state.materialize());
                format!("{}\n\n{}", instruction.trim_end(), input)
            }
            None => input.to_string(),
        }
    }
}

#[async_trait]
impl Stage for AgentStage {
    fn name(&self) -> &str {
        &self.meta.name
    }

    fn output_key(&self) -> Option<&str> {
        self.meta.output_key.as_deref()
    }

    fn is_terminal(&self) -> bool {
        self.meta.terminal
    }

    #[instrument(skip_all, fields(stage = %self.meta.name, adapter = self.adapter.name()))]
    async fn run(&self, input: &str, state: &Arc<SessionState>) -> Result<Outcome, StageError> {
        let started = Instant::now();
        let prompt = self.compose_prompt(input, state);

        self.limits
            .validate_input(&prompt)
            .map_err(|e| StageError::failed(&self.meta.name, e))?;

        let output = self
            .adapter
            .execute(&self.action, &prompt, self.timeout)
            .await
            .map_err(|e| StageError::failed(&self.meta.name, format!("{:#}", e)))?;

        self.limits
            .validate_output(&output.content)
            .map_err(|e| StageError::failed(&self.meta.name, e))?;

        let content = if self.strip_fences {
            strip_code_fence(&output.content)
        } else {
            output.content
        };

        debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            bytes = content.len(),
            "Stage produced output"
        );

        self.meta.settle(content, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterOutput, StaticAdapter};
    use std::sync::Mutex;

    /// Adapter recording every prompt it receives
    #[derive(Default)]
    struct RecordingAdapter {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    #[async_trait]
    impl Adapter for RecordingAdapter {
        fn name(&self) -> &str {
            "recording"
        }

        async fn execute(&self, _action: &str, input: &str, _timeout: Duration) -> anyhow::Result<AdapterOutput> {
            self.prompts.lock().unwrap().push(input.to_string());
            Ok(AdapterOutput::new(self.reply.clone()))
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_instruction_renders_slots() {
        let adapter = Arc::new(RecordingAdapter {
            reply: "<div/>".to_string(),
            ..Default::default()
        });
        let state = Arc::new(SessionState::new("s"));
        state.append("table_output", "<table/>");

        let stage = AgentStage::new("merger", adapter.clone(), "merge")
            .with_instruction("Include {table_output} and {add_output}.");

        stage.run("build it", &state).await.unwrap();

        let prompts = adapter.prompts.lock().unwrap();
        assert_eq!(prompts[0], "Include <table/> and .\n\nbuild it");
    }

    #[tokio::test]
    async fn test_strips_fences_and_publishes() {
        let adapter = Arc::new(RecordingAdapter {
            reply: "```html\n<table/>\n```".to_string(),
            ..Default::default()
        });
        let state = Arc::new(SessionState::new("s"));

        let stage = AgentStage::new("table", adapter, "table")
            .strip_fences(true)
            .with_output_key("table_output");

        let outcome = stage.run("x", &state).await.unwrap();
        assert_eq!(outcome, Outcome::Output("<table/>".to_string()));
        assert_eq!(state.get("table_output").as_deref(), Some("<table/>"));
    }

    #[tokio::test]
    async fn test_output_limit_fails_stage() {
        let state = Arc::new(SessionState::new("s"));
        let limits = StageLimits {
            max_output_bytes: 3,
            ..Default::default()
        };
        let stage = AgentStage::new("big", Arc::new(StaticAdapter), "too long").with_limits(limits, None);

        let err = stage.run("x", &state).await.unwrap_err();
        assert!(matches!(err, StageError::Failed { ref stage, .. } if stage == "big"));
    }

    #[test]
    fn test_timeout_override() {
        let stage = AgentStage::new("s", Arc::new(StaticAdapter), "a").with_limits(StageLimits::default(), Some(7));
        assert_eq!(stage.timeout(), Duration::from_secs(7));
    }
}
