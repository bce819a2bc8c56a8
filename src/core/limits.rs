//! Limits applied to adapter-backed stages.
//!
//! Guards against runaway generation through configurable limits on:
//! - Input/output sizes
//! - Per-stage adapter timeouts

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits for stage execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLimits {
    /// Maximum input size in bytes (default: 10MB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Maximum output size in bytes (default: 10MB)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,

    /// Per-stage adapter timeout in seconds (default: 300 = 5 min)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,
}

fn default_max_input_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB
fn default_max_output_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB
fn default_step_timeout() -> u64 {
    300
} // 5 min

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            max_output_bytes: default_max_output_bytes(),
            step_timeout_seconds: default_step_timeout(),
        }
    }
}

impl StageLimits {
    /// Effective timeout, preferring a per-stage override
    pub fn timeout(&self, override_seconds: Option<u64>) -> Duration {
        Duration::from_secs(override_seconds.unwrap_or(self.step_timeout_seconds))
    }

    /// Validate input against the size limit
    pub fn validate_input(&self, input: &str) -> Result<(), LimitViolation> {
        let size = input.len() as u64;
        if size > self.max_input_bytes {
            return Err(LimitViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }
        Ok(())
    }

    /// Validate output against the size limit
    pub fn validate_output(&self, output: &str) -> Result<(), LimitViolation> {
        let size = output.len() as u64;
        if size > self.max_output_bytes {
            return Err(LimitViolation::MaxOutputBytes {
                actual: size,
                limit: self.max_output_bytes,
            });
        }
        Ok(())
    }
}

/// Limit violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: u64, limit: u64 },

    #[error("Maximum output bytes exceeded: {actual} > {limit}")]
    MaxOutputBytes { actual: u64, limit: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = StageLimits::default();
        assert_eq!(limits.max_input_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.step_timeout_seconds, 300);
    }

    #[test]
    fn test_timeout_override() {
        let limits = StageLimits {
            step_timeout_seconds: 30,
            ..Default::default()
        };
        assert_eq!(limits.timeout(None), Duration::from_secs(30));
        assert_eq!(limits.timeout(Some(2)), Duration::from_secs(2));
    }

    #[test]
    fn test_size_validation() {
        let limits = StageLimits {
            max_input_bytes: 100,
            max_output_bytes: 10,
            ..Default::default()
        };

        assert!(limits.validate_input("short").is_ok());
        let long_input = "x".repeat(200);
        assert!(matches!(
            limits.validate_input(&long_input),
            Err(LimitViolation::MaxInputBytes { actual: 200, limit: 100 })
        ));
        assert!(matches!(
            limits.validate_output("eleven byte"),
            Err(LimitViolation::MaxOutputBytes { .. })
        ));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let limits: StageLimits = serde_yaml::from_str("step_timeout_seconds: 5").unwrap();
        assert_eq!(limits.step_timeout_seconds, 5);
        assert_eq!(limits.max_output_bytes, 10 * 1024 * 1024);
    }
}
