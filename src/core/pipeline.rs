//! Pipeline definitions and loading.
//!
//! Pipelines are defined in YAML as a tree of stage specs under `root`,
//! with an optional decision `gate`. Building a definition against an
//! [`AdapterRegistry`] yields a runnable [`StageGraph`].

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{AdapterRegistry, AdapterType};

use super::agent::AgentStage;
use super::composite::{Parallel, Router, Sequential};
use super::gate::DecisionGate;
use super::limits::StageLimits;
use super::stage::SharedStage;

/// A complete pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDef {
    /// Pipeline name (used in CLI)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Limits applied to every agent stage (defaults when absent)
    #[serde(default)]
    pub limits: Option<StageLimits>,

    /// Classifier deciding whether a request may be served from cache
    #[serde(default)]
    pub gate: Option<StageSpec>,

    /// Root of the stage tree
    pub root: StageSpec,
}

/// One node of the stage tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageSpec {
    Agent(AgentSpec),
    Sequential(CompositeSpec),
    Parallel(CompositeSpec),
    Router(RouterSpec),
}

/// Adapter-backed leaf stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,

    /// Which adapter generates this stage's content
    #[serde(default)]
    pub adapter: AdapterType,

    /// Adapter action (pattern name, model, or literal text for `static`)
    pub action: String,

    /// Template rendered against session state and prepended to the input
    #[serde(default)]
    pub instruction: Option<String>,

    /// Session slot the stage publishes its output to
    #[serde(default)]
    pub output_key: Option<String>,

    /// Output of this stage ends the request chain
    #[serde(default)]
    pub terminal: bool,

    /// Extra output meaning "nothing to add"
    #[serde(default)]
    pub skip_token: Option<String>,

    #[serde(default)]
    pub strip_fences: bool,

    /// Overrides `limits.step_timeout_seconds`
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Sequential or parallel group of stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSpec {
    pub name: String,
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSpec {
    pub name: String,

    /// Stage whose output names the route to take
    pub classifier: Box<StageSpec>,

    pub routes: Vec<StageSpec>,

    /// Route taken when the classifier names none of `routes`
    pub default_route: String,
}

impl StageSpec {
    pub fn name(&self) -> &str {
        match self {
            StageSpec::Agent(spec) => &spec.name,
            StageSpec::Sequential(spec) | StageSpec::Parallel(spec) => &spec.name,
            StageSpec::Router(spec) => &spec.name,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            StageSpec::Agent(_) => "agent",
            StageSpec::Sequential(_) => "sequential",
            StageSpec::Parallel(_) => "parallel",
            StageSpec::Router(_) => "router",
        }
    }

    /// Validate this node and its children, collecting names into `seen`
    fn validate(&self, seen: &mut HashSet<String>) -> Result<()> {
        let name = self.name();
        if name.trim().is_empty() {
            anyhow::bail!("A {} stage has an empty name", self.kind());
        }
        if !seen.insert(name.to_string()) {
            anyhow::bail!("Duplicate stage name '{}'", name);
        }

        match self {
            StageSpec::Agent(spec) => {
                if spec.action.is_empty() {
                    anyhow::bail!("Stage '{}' has an empty action", spec.name);
                }
                if spec.timeout_seconds == Some(0) {
                    anyhow::bail!("Stage '{}' has a zero timeout", spec.name);
                }
            }
            StageSpec::Sequential(spec) | StageSpec::Parallel(spec) => {
                if spec.stages.is_empty() {
                    anyhow::bail!("{} stage '{}' has no stages", self.kind(), spec.name);
                }
                for child in &spec.stages {
                    child.validate(seen)?;
                }
            }
            StageSpec::Router(spec) => {
                if spec.routes.is_empty() {
                    anyhow::bail!("Router '{}' has no routes", spec.name);
                }
                if !spec.routes.iter().any(|r| r.name() == spec.default_route) {
                    anyhow::bail!(
                        "Router '{}' default route '{}' is not one of its routes",
                        spec.name,
                        spec.default_route
                    );
                }
                spec.classifier.validate(seen)?;
                for route in &spec.routes {
                    route.validate(seen)?;
                }
            }
        }

        Ok(())
    }

    fn build(&self, adapters: &AdapterRegistry, limits: &StageLimits) -> Result<SharedStage> {
        let stage: SharedStage = match self {
            StageSpec::Agent(spec) => {
                let adapter = adapters
                    .get(spec.adapter)
                    .with_context(|| format!("Cannot build stage '{}'", spec.name))?;

                let mut stage = AgentStage::new(&spec.name, adapter, &spec.action)
                    .strip_fences(spec.strip_fences)
                    .with_limits(limits.clone(), spec.timeout_seconds);
                if let Some(instruction) = &spec.instruction {
                    stage = stage.with_instruction(instruction);
                }
                if let Some(key) = &spec.output_key {
                    stage = stage.with_output_key(key);
                }
                if let Some(token) = &spec.skip_token {
                    stage = stage.with_skip_token(token);
                }
                if spec.terminal {
                    stage = stage.terminal();
                }
                Arc::new(stage)
            }
            StageSpec::Sequential(spec) => {
                let stages = build_all(&spec.stages, adapters, limits)?;
                Arc::new(Sequential::new(&spec.name, stages))
            }
            StageSpec::Parallel(spec) => {
                let branches = build_all(&spec.stages, adapters, limits)?;
                Arc::new(Parallel::new(&spec.name, branches))
            }
            StageSpec::Router(spec) => {
                let classifier = spec.classifier.build(adapters, limits)?;
                let routes = build_all(&spec.routes, adapters, limits)?;
                Arc::new(Router::new(&spec.name, classifier, routes, &spec.default_route)?)
            }
        };

        Ok(stage)
    }
}

fn build_all(specs: &[StageSpec], adapters: &AdapterRegistry, limits: &StageLimits) -> Result<Vec<SharedStage>> {
    specs.iter().map(|spec| spec.build(adapters, limits)).collect()
}

/// Runnable form of a pipeline
pub struct StageGraph {
    pub gate: Option<DecisionGate>,
    pub root: SharedStage,
}

impl PipelineDef {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    pub fn effective_limits(&self) -> StageLimits {
        self.limits.clone().unwrap_or_default()
    }

    /// Validate the pipeline definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Pipeline name cannot be empty");
        }

        if self.effective_limits().step_timeout_seconds == 0 {
            anyhow::bail!("Pipeline '{}' has a zero step timeout", self.name);
        }

        // Stage names are unique across the gate and the whole tree
        let mut seen = HashSet::new();
        if let Some(gate) = &self.gate {
            gate.validate(&mut seen)?;
        }
        self.root.validate(&mut seen)
    }

    /// Validate and build the stage graph
    pub fn build(&self, adapters: &AdapterRegistry) -> Result<StageGraph> {
        self.validate()?;

        let limits = self.effective_limits();
        let gate = match &self.gate {
            Some(spec) => Some(DecisionGate::new(spec.build(adapters, &limits)?)),
            None => None,
        };
        let root = self.root.build(adapters, &limits)?;

        Ok(StageGraph { gate, root })
    }

    /// Names of every stage, depth first
    pub fn stage_names(&self) -> Vec<String> {
        fn walk(spec: &StageSpec, out: &mut Vec<String>) {
            out.push(spec.name().to_string());
            match spec {
                StageSpec::Agent(_) => {}
                StageSpec::Sequential(c) | StageSpec::Parallel(c) => c.stages.iter().for_each(|s| walk(s, out)),
                StageSpec::Router(r) => {
                    walk(&r.classifier, out);
                    r.routes.iter().for_each(|s| walk(s, out));
                }
            }
        }

        let mut names = Vec::new();
        if let Some(gate) = &self.gate {
            walk(gate, &mut names);
        }
        walk(&self.root, &mut names);
        names
    }
}
