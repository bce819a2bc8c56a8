//! Command adapter: runs an external program per stage invocation.
//!
//! The program receives the stage input on stdin and answers on stdout.
//! Any `{action}` in its arguments is replaced with the stage's action,
//! e.g. `fabric -p {action}` or `llm -m {action}`.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Adapter, AdapterOutput};

/// Placeholder substituted with the stage action in program arguments
pub const ACTION_PLACEHOLDER: &str = "{action}";

/// Adapter spawning a subprocess for every execution
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    program: String,
    args: Vec<String>,
}

impl Default for CommandAdapter {
    fn default() -> Self {
        Self::new("fabric", vec!["-p".to_string(), ACTION_PLACEHOLDER.to_string()])
    }
}

impl CommandAdapter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with the action substituted
    pub fn args_for(&self, action: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(ACTION_PLACEHOLDER, action))
            .collect()
    }

    async fn execute_subprocess(&self, action: &str, input: &str, step_timeout: Duration) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(self.args_for(action))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for action '{}'", self.program, action))?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(input.as_bytes()).await {
                    // The program may exit without reading all of its input
                    Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
                // Dropping stdin signals EOF
            }
            Ok(())
        };

        // Feed stdin while draining stdout so large inputs cannot deadlock
        let exchange = async move { tokio::join!(feed, child.wait_with_output()) };

        let (fed, output) = timeout(step_timeout, exchange)
            .await
            .with_context(|| format!("Action '{}' timed out after {:?}", action, step_timeout))?;
        fed.with_context(|| format!("Failed to write to '{}' stdin", self.program))?;
        let output =
            output.with_context(|| format!("Failed to wait for '{}' running action '{}'", self.program, action))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Action '{}' failed with exit code {}: {}",
                action,
                exit_code,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout).with_context(|| format!("Output of '{}' is not valid UTF-8", self.program))
    }
}

#[async_trait]
impl Adapter for CommandAdapter {
    fn name(&self) -> &str {
        "command"
    }

    async fn execute(&self, action: &str, input: &str, timeout: Duration) -> Result<AdapterOutput> {
        let content = self.execute_subprocess(action, input, timeout).await?;
        Ok(AdapterOutput::new(content))
    }

    async fn health_check(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to run '{}' health check", self.program))?;

        if !status.success() {
            anyhow::bail!("'{}' health check exited with {}", self.program, status);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_substitution() {
        let adapter = CommandAdapter::default();
        assert_eq!(adapter.program(), "fabric");
        assert_eq!(adapter.args_for("summarize"), vec!["-p", "summarize"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipes_input_through_program() {
        let adapter = CommandAdapter::new("cat", vec![]);
        let out = adapter
            .execute("ignored", "hello from stdin", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.content, "hello from stdin");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let adapter = CommandAdapter::new("sh", vec!["-c".to_string(), "echo {action} >&2; exit 3".to_string()]);
        let err = adapter
            .execute("broken", "", Duration::from_secs(5))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exit code 3"), "{}", message);
        assert!(message.contains("broken"), "{}", message);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_input_larger_than_pipe_buffer() {
        let adapter = CommandAdapter::new("cat", vec![]);
        let input = "x".repeat(1024 * 1024);

        let out = tokio::time::timeout(
            Duration::from_secs(10),
            adapter.execute("ignored", &input, Duration::from_secs(5)),
        )
        .await
        .expect("exchange must not deadlock")
        .unwrap();
        assert_eq!(out.content.len(), input.len());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_covers_stdin_write() {
        // Never reads stdin, so a large write can only finish by timing out
        let adapter = CommandAdapter::new("sleep", vec!["5".to_string()]);
        let input = "x".repeat(1024 * 1024);

        let started = std::time::Instant::now();
        let err = adapter
            .execute("slow", &input, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let adapter = CommandAdapter::new("definitely-not-a-real-program-xyz", vec![]);
        assert!(adapter
            .execute("a", "b", Duration::from_secs(1))
            .await
            .is_err());
    }
}
