use crate::models::ScanOutcome;
use anyhow::{Context, Result};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Failure to persist a scan outcome. Opaque to the arbiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to save scan: {message}")]
pub struct PersistError {
    message: String,
}

impl PersistError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for PersistError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Persists completed scan outcomes.
///
/// Called once per resolved cycle, from a task of its own; a failure is reported to
/// observers and never changes the arbiter's state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn record(&self, outcome: ScanOutcome) -> Result<(), PersistError>;
}

/// Record sink that appends one JSON object per line to an activity file
#[derive(Debug, Clone)]
pub struct JsonlRecordSink {
    path: Utf8PathBuf,
}

impl JsonlRecordSink {
    pub fn new<P: AsRef<Utf8Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonlRecordSink {
    async fn record(&self, outcome: ScanOutcome) -> Result<(), PersistError> {
        let mut line = serde_json::to_vec(&outcome)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        tracing::debug!("Appended scan {} to {}", outcome.id, self.path);
        Ok(())
    }
}

/// Record sink that keeps outcomes in memory
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    outcomes: Mutex<Vec<ScanOutcome>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every outcome recorded so far, oldest first
    pub fn outcomes(&self) -> Vec<ScanOutcome> {
        self.outcomes
            .lock()
            .map(|outcomes| outcomes.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn record(&self, outcome: ScanOutcome) -> Result<(), PersistError> {
        self.outcomes
            .lock()
            .map_err(|_| PersistError::new("activity store poisoned"))?
            .push(outcome);
        Ok(())
    }
}

/// Activity view selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActivityFilter {
    #[default]
    All,
    /// Products that met the dietary needs
    Good,
    /// Products with restricted ingredients
    Bad,
}

impl ActivityFilter {
    pub fn accepts(self, outcome: &ScanOutcome) -> bool {
        match self {
            Self::All => true,
            Self::Good => outcome.is_safe,
            Self::Bad => !outcome.is_safe,
        }
    }
}

/// Select the outcomes a filter accepts, preserving order
pub fn filter_activity(outcomes: &[ScanOutcome], filter: ActivityFilter) -> Vec<&ScanOutcome> {
    outcomes.iter().filter(|o| filter.accepts(o)).collect()
}

/// Load an activity history written by [`JsonlRecordSink`].
///
/// A missing file is an empty history. Lines that do not parse are skipped with a warning.
pub fn load_activity(path: &Utf8Path) -> Result<Vec<ScanOutcome>> {
    if !path.exists() {
        tracing::info!("No activity history at {}", path);
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read activity history: {}", path))?;

    let mut outcomes = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ScanOutcome>(line) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::warn!("Skipping malformed activity line {}: {}", index + 1, e),
        }
    }

    tracing::info!("Loaded {} scans from {}", outcomes.len(), path);
    Ok(outcomes)
}
