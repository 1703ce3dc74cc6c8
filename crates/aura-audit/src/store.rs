//! Audit entry persistence.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;

use crate::entry::AuditEntry;
use crate::error::AuditError;

/// Append-only storage for committed entries.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append `entries` in order. Either all are stored or the call fails.
    async fn append(&self, entries: &[AuditEntry]) -> Result<(), AuditError>;

    /// Every stored entry in append order.
    async fn load_all(&self) -> Result<Vec<AuditEntry>, AuditError>;

    /// The most recently stored entry.
    async fn last(&self) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.load_all().await?.pop())
    }
}

/// Entries held in process memory.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        self.entries.lock().extend_from_slice(entries);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.entries.lock().clone())
    }

    async fn last(&self) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.entries.lock().last().cloned())
    }
}

/// One JSON object per line, appended to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesAuditStore {
    path: PathBuf,
}

impl JsonLinesAuditStore {
    /// Store writing to `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decode JSON lines, skipping blank lines.
///
/// # Errors
///
/// [`AuditError::Corrupt`] naming the first undecodable line.
pub fn parse_json_lines(text: &str) -> Result<Vec<AuditEntry>, AuditError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| AuditError::Corrupt {
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl AuditStore for JsonLinesAuditStore {
    async fn append(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut batch = String::new();
        for entry in entries {
            batch.push_str(&serde_json::to_string(entry)?);
            batch.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AuditError::io(&self.path, e))?;
        file.write_all(batch.as_bytes())
            .await
            .map_err(|e| AuditError::io(&self.path, e))?;
        file.flush().await.map_err(|e| AuditError::io(&self.path, e))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => parse_json_lines(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AuditError::io(&self.path, e)),
        }
    }
}
