use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::error::SinkError;
use super::{BootRow, EventStore};

/// Append-only JSON-lines journal of boot rows.
pub struct JournalStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JournalStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| SinkError::io("opening boot journal", &path, source))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventStore for JournalStore {
    async fn record_boot(&self, row: &BootRow) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(row).map_err(SinkError::Serialize)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|source| SinkError::io("appending boot row", &self.path, source))?;
        file.flush()
            .await
            .map_err(|source| SinkError::io("flushing boot journal", &self.path, source))?;
        Ok(())
    }
}
