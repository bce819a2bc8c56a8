//! Configuration for stagehand.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STAGEHAND_HOME, STAGEHAND_PIPELINES)
//! 2. Config file (.stagehand/config.yaml)
//! 3. Defaults (~/.stagehand, ./pipelines)
//!
//! Config file discovery:
//! - Searches current directory and parents for .stagehand/config.yaml
//! - `paths.home` is relative to the .stagehand/ directory
//! - Other paths are relative to the project root (parent of .stagehand/)

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::{AdapterRegistry, CommandAdapter};
use crate::core::cache::{Cache, FileStore, MemoryStore, DEFAULT_CAPACITY};
use crate::core::limits::StageLimits;
use crate::core::session::keys;

const CONFIG_DIR: &str = ".stagehand";
const HOME_ENV: &str = "STAGEHAND_HOME";
const PIPELINES_ENV: &str = "STAGEHAND_PIPELINES";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub limits: Option<StageLimits>,
    #[serde(default)]
    pub adapter: Option<CommandConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .stagehand/)
    pub home: Option<String>,
    /// Pipeline definitions directory (relative to project root)
    pub pipelines: Option<String>,
}

/// Which store backs the response cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    pub capacity: Option<usize>,
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    pub root_prompt: Option<String>,
    pub styling_instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_journal_enabled")]
    pub enabled: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: default_journal_enabled(),
        }
    }
}

fn default_journal_enabled() -> bool {
    true
}

/// External program used by `command` stages
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory (journal, file cache)
    pub home: PathBuf,
    /// Directory searched for `<name>.yaml` pipelines
    pub pipelines: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub cache: CacheSettings,
    /// Values seeded into every session
    pub session: SessionConfig,
    pub journal_enabled: bool,
    /// Default limits for pipelines that don't set their own
    pub limits: Option<StageLimits>,
    pub command: CommandAdapter,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub capacity: usize,
    pub dir: PathBuf,
}

impl ResolvedConfig {
    /// Construct the configured response cache
    pub async fn build_cache(&self) -> Result<Cache> {
        let cache = match self.cache.backend {
            CacheBackend::Memory => Cache::new(Arc::new(MemoryStore::new(self.cache.capacity))),
            CacheBackend::File => Cache::new(Arc::new(FileStore::open(&self.cache.dir).await?)),
            CacheBackend::Disabled => Cache::disabled(),
        };
        Ok(cache)
    }

    /// Adapters available to pipelines
    pub fn adapter_registry(&self) -> AdapterRegistry {
        AdapterRegistry::with_command(self.command.clone())
    }

    /// Session values seeded before every run
    pub fn session_seed(&self) -> Vec<(String, String)> {
        let mut seed = Vec::new();
        if let Some(root_prompt) = &self.session.root_prompt {
            seed.push((keys::ROOT_PROMPT.to_string(), root_prompt.clone()));
        }
        if let Some(styling) = &self.session.styling_instructions {
            seed.push((keys::STYLING_INSTRUCTIONS.to_string(), styling.clone()));
        }
        seed
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file (if any), environment, and defaults
fn resolve(
    config_path: Option<&Path>,
    file: ConfigFile,
    env: impl Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> ResolvedConfig {
    // .stagehand/ and the project root containing it
    let config_dir = config_path.and_then(Path::parent);
    let base_dir = config_dir.and_then(Path::parent);

    let home = match (env(HOME_ENV), &file.paths.home, config_dir) {
        (Some(env_home), _, _) => PathBuf::from(env_home),
        (None, Some(home), Some(dir)) => resolve_path(dir, home),
        _ => default_home,
    };

    let pipelines = match (env(PIPELINES_ENV), &file.paths.pipelines, base_dir) {
        (Some(env_pipelines), _, _) => PathBuf::from(env_pipelines),
        (None, Some(pipelines), Some(dir)) => resolve_path(dir, pipelines),
        (None, _, Some(dir)) => dir.join("pipelines"),
        _ => PathBuf::from("pipelines"),
    };

    let cache_dir = match (&file.cache.dir, base_dir) {
        (Some(dir), Some(base)) => resolve_path(base, dir),
        (Some(dir), None) => PathBuf::from(dir),
        (None, _) => home.join("cache"),
    };

    let command = file
        .adapter
        .map(|c| CommandAdapter::new(c.program, c.args))
        .unwrap_or_default();

    ResolvedConfig {
        cache: CacheSettings {
            backend: file.cache.backend,
            capacity: file.cache.capacity.unwrap_or(DEFAULT_CAPACITY),
            dir: cache_dir,
        },
        home,
        pipelines,
        config_file: config_path.map(Path::to_path_buf),
        session: file.session,
        journal_enabled: file.journal.enabled,
        limits: file.limits,
        command,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_path = find_config_file();
    let file = match &config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(
        config_path.as_deref(),
        file,
        |name| std::env::var(name).ok(),
        default_home,
    ))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the runs directory ($STAGEHAND_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}

/// Get the pipelines directory
pub fn pipelines_dir() -> Result<PathBuf> {
    Ok(config()?.pipelines.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, ConfigFile::default(), no_env, PathBuf::from("/h/.stagehand"));

        assert_eq!(config.home, PathBuf::from("/h/.stagehand"));
        assert_eq!(config.pipelines, PathBuf::from("pipelines"));
        assert_eq!(config.cache.dir, PathBuf::from("/h/.stagehand/cache"));
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.capacity, DEFAULT_CAPACITY);
        assert!(config.journal_enabled);
        assert!(config.config_file.is_none());
        assert!(config.session_seed().is_empty());
        assert_eq!(config.command.program(), "fabric");
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
  pipelines: ./defs
cache:
  backend: file
  capacity: 5
session:
  root_prompt: "Design a calm page"
  styling_instructions: "Use blue"
journal:
  enabled: false
limits:
  step_timeout_seconds: 30
adapter:
  program: llm
  args: ["-t", "{{action}}"]
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("1.0"));
        assert_eq!(parsed.cache.backend, CacheBackend::File);

        let config = resolve(Some(&config_path), parsed, no_env, PathBuf::from("/unused"));
        assert_eq!(config.home, config_dir.join("state"));
        assert_eq!(config.pipelines, temp.path().join("defs"));
        assert_eq!(config.cache.dir, config_dir.join("state").join("cache"));
        assert_eq!(config.cache.capacity, 5);
        assert!(!config.journal_enabled);
        assert_eq!(config.limits.as_ref().unwrap().step_timeout_seconds, 30);
        assert_eq!(config.command.program(), "llm");
        assert_eq!(config.command.args_for("summarize"), vec!["-t", "summarize"]);
        assert_eq!(
            config.session_seed(),
            vec![
                (keys::ROOT_PROMPT.to_string(), "Design a calm page".to_string()),
                (keys::STYLING_INSTRUCTIONS.to_string(), "Use blue".to_string()),
            ]
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str("paths: { home: ./state }\ncache: { backend: none }").unwrap();
        let env = |name: &str| match name {
            HOME_ENV => Some("/env/home".to_string()),
            PIPELINES_ENV => Some("/env/pipelines".to_string()),
            _ => None,
        };

        let config = resolve(Some(Path::new("/p/.stagehand/config.yaml")), file, env, PathBuf::from("/unused"));
        assert_eq!(config.home, PathBuf::from("/env/home"));
        assert_eq!(config.pipelines, PathBuf::from("/env/pipelines"));
        assert_eq!(config.cache.backend, CacheBackend::Disabled);
    }

    #[tokio::test]
    async fn test_build_cache_per_backend() {
        let temp = TempDir::new().unwrap();
        let mut config = resolve(None, ConfigFile::default(), no_env, temp.path().to_path_buf());

        assert_eq!(config.build_cache().await.unwrap().backend_name(), "memory");

        config.cache.backend = CacheBackend::File;
        assert_eq!(config.build_cache().await.unwrap().backend_name(), "file");
        assert!(config.cache.dir.exists());

        config.cache.backend = CacheBackend::Disabled;
        assert!(!config.build_cache().await.unwrap().is_enabled());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
