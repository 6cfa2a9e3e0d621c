//! Append-only JSON-lines audit file

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::audit::{page_newest_first, AuditEntry, AuditError, AuditQuery, AuditSink};
use crate::filesys::file::File;

/// One JSON object per line, appended in arrival order
pub struct JsonlAuditSink {
    file: File,
    // Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(file: File) -> Self {
        Self {
            file,
            write_lock: Mutex::new(()),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    async fn read_all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        if !self.file.exists().await {
            return Ok(Vec::new());
        }

        let contents = self
            .file
            .read_string()
            .await
            .map_err(|e| AuditError::Read(e.to_string()))?;

        let mut entries = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping malformed audit line {} in {}: {}",
                    n + 1,
                    self.file.path().display(),
                    e
                ),
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.write_lock.lock().await;
        self.file
            .append_line(&line)
            .await
            .map_err(|e| AuditError::Write(e.to_string()))
    }

    async fn list(&self, query: AuditQuery) -> Result<Vec<AuditEntry>, AuditError> {
        let _guard = self.write_lock.lock().await;
        let entries = self.read_all().await?;
        Ok(page_newest_first(entries.iter(), query))
    }
}
