//! Static adapter: the action text is the output.
//!
//! Used for fixed decision gates, canned fallbacks, and pipeline fixtures.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{Adapter, AdapterOutput};

#[derive(Debug, Clone, Copy, Default)]
pub struct StaticAdapter;

#[async_trait]
impl Adapter for StaticAdapter {
    fn name(&self) -> &str {
        "static"
    }

    async fn execute(&self, action: &str, _input: &str, _timeout: Duration) -> Result<AdapterOutput> {
        Ok(AdapterOutput::new(action.to_string()))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_action() {
        let out = StaticAdapter
            .execute("CACHE", "ignored", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out.content, "CACHE");
    }
}
