//! Command-line interface for stagehand.
//!
//! Provides commands for running pipelines, computing and invalidating
//! cache keys, validating pipeline definitions, and inspecting run journals.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::{self, CacheBackend};
use crate::core::{prompt_cache_key, Journal, Orchestrator, PipelineDef};
use crate::domain::{ResponseKind, RunEvent};

/// stagehand - Multi-stage agent orchestrator with response caching
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline on one request
    Run {
        /// Pipeline name (will look for pipelines/<name>.yaml)
        pipeline_name: String,

        /// Request text: plain prompt or {"id": ..., "prompt": ...} literal
        prompt: Option<String>,

        /// Read the request from a file
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read the request from stdin
        #[arg(long)]
        stdin: bool,

        /// Session ID (generated if not provided)
        #[arg(short, long)]
        session: Option<String>,

        /// Root prompt prefixed to cache keys (overrides config)
        #[arg(long)]
        root_prompt: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the cache key for a prompt
    Hash {
        /// Prompt text
        text: String,

        /// Root prompt prefix (defaults to the configured one)
        #[arg(long)]
        root_prompt: Option<String>,
    },

    /// Remove a cache entry by key
    Invalidate {
        /// Cache key (as printed by `hash`)
        key: String,
    },

    /// Validate a pipeline definition
    Validate {
        /// Pipeline name
        pipeline_name: String,
    },

    /// List recent sessions from the run journal
    Runs {
        /// Maximum number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                pipeline_name,
                prompt,
                input,
                stdin,
                session,
                root_prompt,
                json,
            } => {
                run_pipeline(&pipeline_name, prompt, input, stdin, session, root_prompt, json).await
            }
            Commands::Hash { text, root_prompt } => {
                print_hash(&text, root_prompt)
            }
            Commands::Invalidate { key } => {
                invalidate(&key).await
            }
            Commands::Validate { pipeline_name } => {
                validate_pipeline(&pipeline_name)
            }
            Commands::Runs { limit } => {
                list_runs(limit).await
            }
            Commands::Config => {
                show_config()
            }
        }
    }
}

/// Run a pipeline on a single request
async fn run_pipeline(
    pipeline_name: &str,
    prompt: Option<String>,
    input_file: Option<PathBuf>,
    use_stdin: bool,
    session_id: Option<String>,
    root_prompt: Option<String>,
    json: bool,
) -> Result<()> {
    let cfg = config::config()?;

    let mut pipeline = load_pipeline(pipeline_name)?;
    if pipeline.limits.is_none() {
        pipeline.limits = cfg.limits.clone();
    }
    let graph = pipeline.build(&cfg.adapter_registry())?;

    // Get the request
    let request = if let Some(text) = prompt {
        text
    } else if let Some(path) = input_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if use_stdin || !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No request provided. Pass a prompt, use --input <file>, or pipe to stdin");
    };

    if request.trim().is_empty() {
        anyhow::bail!("Request is empty");
    }

    let cache = Arc::new(cfg.build_cache().await?);
    let mut orchestrator = Orchestrator::from_graph(graph, cache);
    for (key, value) in cfg.session_seed() {
        orchestrator = orchestrator.with_seed(key, value);
    }
    if let Some(root_prompt) = root_prompt {
        orchestrator = orchestrator.with_root_prompt(root_prompt);
    }
    if cfg.journal_enabled {
        orchestrator = orchestrator.with_journal(Journal::open(cfg.runs_dir()).await?);
    }

    let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let response = orchestrator.run(request.trim_end(), &session_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", response.text);
    }

    match response.kind {
        ResponseKind::Escalated => {
            eprintln!("\n[Session {} escalated]", response.session_id);
            std::process::exit(1);
        }
        kind => {
            eprintln!("\n[Session {} finished: {:?}, key {}]", response.session_id, kind, response.cache_key);
        }
    }

    Ok(())
}

/// Print the cache key a prompt maps to
fn print_hash(text: &str, root_prompt: Option<String>) -> Result<()> {
    let root = match root_prompt {
        Some(root) => root,
        None => config::config()?.session.root_prompt.clone().unwrap_or_default(),
    };

    println!("{}", prompt_cache_key(&root, text));
    Ok(())
}

/// Delete a key from the configured cache
async fn invalidate(key: &str) -> Result<()> {
    let cfg = config::config()?;

    if cfg.cache.backend != CacheBackend::File {
        eprintln!(
            "Warning: cache backend is {:?}; entries only live inside a running process",
            cfg.cache.backend
        );
    }

    let cache = cfg.build_cache().await?;
    let existed = cache.exists(key).await?;
    cache.delete(key).await?;

    if existed {
        println!("Invalidated {}", key);
    } else {
        println!("No entry for {}", key);
    }

    Ok(())
}

/// Validate a pipeline and print its stage tree
fn validate_pipeline(name: &str) -> Result<()> {
    let cfg = config::config()?;
    let pipeline = load_pipeline(name)?;
    pipeline.build(&cfg.adapter_registry())?;

    println!("Pipeline '{}' is valid", pipeline.name);
    if !pipeline.description.is_empty() {
        println!("  {}", pipeline.description);
    }
    println!("  Gate: {}", pipeline.gate.as_ref().map_or("(none - always live)", |g| g.name()));
    println!("  Stages: {}", pipeline.stage_names().join(", "));

    Ok(())
}

/// List recent sessions from the journal
async fn list_runs(limit: usize) -> Result<()> {
    let journal = Journal::open_default().await?;

    let mut sessions: Vec<(String, Vec<RunEvent>)> = Vec::new();
    for session in journal.list_sessions().await? {
        let events = journal.replay(&session).await?;
        if !events.is_empty() {
            sessions.push((session, events));
        }
    }

    if sessions.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    // Most recent activity first
    sessions.sort_by_key(|(_, events)| std::cmp::Reverse(events.last().map(|e| e.timestamp)));

    println!("{:<38} {:<8} {:<14} {:<25}", "SESSION", "EVENTS", "LAST EVENT", "UPDATED");
    println!("{}", "-".repeat(88));

    for (session, events) in sessions.into_iter().take(limit) {
        if let Some(last) = events.last() {
            println!(
                "{:<38} {:<8} {:<14} {:<25}",
                session,
                events.len(),
                format!("{:?}", last.event_type),
                last.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("stagehand configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Pipelines:           {}", cfg.pipelines.display());
    println!("  Runs:                {}", cfg.runs_dir().display());
    println!();
    println!("Cache:");
    println!("  Backend:  {:?}", cfg.cache.backend);
    println!("  Capacity: {}", cfg.cache.capacity);
    println!("  Dir:      {}", cfg.cache.dir.display());
    println!();
    println!("Session seed:");
    let seed = cfg.session_seed();
    if seed.is_empty() {
        println!("  (none)");
    }
    for (key, value) in seed {
        println!("  {}: {}", key, value);
    }
    println!();
    println!("Journal: {}", if cfg.journal_enabled { "enabled" } else { "disabled" });
    println!("Command adapter: {} {}", cfg.command.program(), cfg.command.args_for("{action}").join(" "));
    if let Some(limits) = &cfg.limits {
        println!();
        println!("Default limits:");
        println!("  Timeout:         {}s", limits.step_timeout_seconds);
        println!("  Max input size:  {} bytes", limits.max_input_bytes);
        println!("  Max output size: {} bytes", limits.max_output_bytes);
    }

    Ok(())
}

/// Load a pipeline by name
fn load_pipeline(name: &str) -> Result<PipelineDef> {
    // Look in the configured pipelines directory
    let pipeline_path = config::pipelines_dir()?.join(format!("{}.yaml", name));

    let path = if pipeline_path.exists() {
        pipeline_path
    } else {
        // Try looking in the current directory
        let alt_path = PathBuf::from(format!("{}.yaml", name));
        if !alt_path.exists() {
            anyhow::bail!(
                "Pipeline '{}' not found. Looked for:\n  - {}\n  - {}",
                name,
                pipeline_path.display(),
                alt_path.display()
            );
        }
        alt_path
    };

    let pipeline = PipelineDef::from_file(&path)?;
    pipeline.validate()?;
    Ok(pipeline)
}
