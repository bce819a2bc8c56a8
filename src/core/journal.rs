//! Append-only run journal with file-based persistence.
//!
//! Each session gets one newline-delimited JSON (JSONL) file of
//! [`RunEvent`]s, for debugging and inspection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::RunEvent;

use super::cache::hash_key;

/// File-based journal using JSONL format
#[derive(Debug, Clone)]
pub struct Journal {
    /// Directory containing one file per session
    dir: PathBuf,
}

impl Journal {
    /// Open (and create if needed) a journal directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create journal directory: {}", dir.display()))?;

        Ok(Self { dir })
    }

    /// Open the journal in the configured runs directory
    pub async fn open_default() -> Result<Self> {
        Self::open(crate::config::runs_dir()?).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a session's journal file.
    ///
    /// Session ids that are not filename-safe are hashed.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        let safe = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        let stem = if safe {
            session_id.to_string()
        } else {
            hash_key(session_id)
        };
        self.dir.join(format!("{}.jsonl", stem))
    }

    /// Append an event to its session's log
    pub async fn append(&self, event: &RunEvent) -> Result<()> {
        let path = self.path_for(&event.session_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open journal file: {}", path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize run event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write run event")?;
        file.flush().await.context("Failed to flush run event")?;

        Ok(())
    }

    /// Replay a session's events in order
    pub async fn replay(&self, session_id: &str) -> Result<Vec<RunEvent>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open journal file: {}", path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: RunEvent =
                serde_json::from_str(&line).with_context(|| format!("Failed to parse run event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// List journaled session file stems
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read journal directory: {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".jsonl") {
                    sessions.push(stem.to_string());
                }
            }
        }

        sessions.sort();
        Ok(sessions)
    }
}
