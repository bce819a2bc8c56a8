//! Adapter interfaces for content generation.
//!
//! Adapters are the seam to whatever actually generates a stage's text
//! (an LLM CLI, a model server, a canned fixture). The orchestrator treats
//! them as opaque `input -> output` functions.

pub mod command;
pub mod fixed;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use command::CommandAdapter;
pub use fixed::StaticAdapter;

/// Output from an adapter execution
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    /// The content returned by the adapter
    pub content: String,
}

impl AdapterOutput {
    /// Create a new adapter output with just content
    pub fn new(content: String) -> Self {
        Self { content }
    }
}

/// Trait for content-generating adapters
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Execute an action with input
    async fn execute(&self, action: &str, input: &str, timeout: Duration) -> Result<AdapterOutput>;

    /// Check the adapter can run at all
    async fn health_check(&self) -> Result<()>;
}

/// Supported adapter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    /// External program invoked per stage
    #[default]
    Command,

    /// Returns the action text verbatim
    Static,
}

/// Adapters available to pipeline definitions, by type
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<AdapterType, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a static adapter and the given command adapter
    pub fn with_command(command: CommandAdapter) -> Self {
        Self::new()
            .register(AdapterType::Static, Arc::new(StaticAdapter))
            .register(AdapterType::Command, Arc::new(command))
    }

    pub fn register(mut self, adapter_type: AdapterType, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(adapter_type, adapter);
        self
    }

    pub fn get(&self, adapter_type: AdapterType) -> Result<Arc<dyn Adapter>> {
        self.adapters
            .get(&adapter_type)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No adapter registered for type {:?}", adapter_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = AdapterRegistry::new().register(AdapterType::Static, Arc::new(StaticAdapter));

        assert_eq!(registry.get(AdapterType::Static).unwrap().name(), "static");
        assert!(registry.get(AdapterType::Command).is_err());
    }

    #[test]
    fn test_adapter_type_yaml() {
        let parsed: AdapterType = serde_yaml::from_str("static").unwrap();
        assert_eq!(parsed, AdapterType::Static);
        assert_eq!(AdapterType::default(), AdapterType::Command);
    }
}
