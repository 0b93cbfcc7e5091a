//! Trade journal (tick and fill persistence)
//!
//! The pipeline persists every tick before acting on it and every fill after
//! booking it. Journal failures are reported but never stop the pipeline.
//!
//! - `JsonlJournal`: one JSON object per line, tagged with `kind`
//! - `MemoryJournal`: in-memory, for tests and dry runs
//! - `NoopJournal`: discards everything

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crate::adapters::types::{Fill, Tick};

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Journal IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Journal unavailable: {0}")]
    Unavailable(String),
}

/// One persisted journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Tick(Tick),
    Fill(Fill),
}

/// Persistence sink for the pipeline
#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn record_tick(&self, tick: &Tick) -> Result<(), JournalError>;

    async fn record_fill(&self, fill: &Fill) -> Result<(), JournalError>;
}

pub type SharedJournal = Arc<dyn TradeJournal>;

// =============================================================================
// JSON lines
// =============================================================================

/// Append-only JSON-lines journal
pub struct JsonlJournal {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonlJournal {
    /// Open (or create) `path` for appending
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        info!(path = %path.display(), "[JOURNAL] Opened");
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry back from a journal file
    pub async fn read_entries(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>, JournalError> {
        let file = File::open(path.as_ref()).await?;
        let mut lines = BufReader::new(file).lines();
        let mut entries = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    async fn append(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonlJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlJournal").field("path", &self.path).finish()
    }
}

#[async_trait]
impl TradeJournal for JsonlJournal {
    async fn record_tick(&self, tick: &Tick) -> Result<(), JournalError> {
        self.append(&JournalEntry::Tick(tick.clone())).await
    }

    async fn record_fill(&self, fill: &Fill) -> Result<(), JournalError> {
        self.append(&JournalEntry::Fill(fill.clone())).await
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn ticks(&self) -> Vec<Tick> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Tick(tick) => Some(tick),
                JournalEntry::Fill(_) => None,
            })
            .collect()
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Fill(fill) => Some(fill),
                JournalEntry::Tick(_) => None,
            })
            .collect()
    }

    fn push(&self, entry: JournalEntry) -> Result<(), JournalError> {
        self.entries
            .lock()
            .map_err(|_| JournalError::Unavailable("memory journal lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}

#[async_trait]
impl TradeJournal for MemoryJournal {
    async fn record_tick(&self, tick: &Tick) -> Result<(), JournalError> {
        self.push(JournalEntry::Tick(tick.clone()))
    }

    async fn record_fill(&self, fill: &Fill) -> Result<(), JournalError> {
        self.push(JournalEntry::Fill(fill.clone()))
    }
}

/// Journal that persists nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJournal;

#[async_trait]
impl TradeJournal for NoopJournal {
    async fn record_tick(&self, _tick: &Tick) -> Result<(), JournalError> {
        Ok(())
    }

    async fn record_fill(&self, _fill: &Fill) -> Result<(), JournalError> {
        Ok(())
    }
}
