//! File-backed [`AuditSink`]: appends one JSON line per entry.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thinktank_core::{AuditEntry, AuditSink};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

pub struct FileAuditSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl FileAuditSink {
    pub fn new(path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            path,
            file: Mutex::new(None),
        })
    }

    async fn open(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn log(&self, entry: AuditEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize audit entry");
                return;
            }
        };

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            match self.open().await {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    warn!(error = %e, path = %self.path.display(), "failed to open audit log");
                    return;
                }
            }
        }

        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                warn!(error = %e, "failed to write audit entry");
                *guard = None;
            }
        }
    }
}
