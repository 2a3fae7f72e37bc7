//! Local filesystem exporter.
//!
//! Writes each cycle's snapshot as a timestamped JSON file into a
//! configured directory. Richer sinks (spreadsheets, object stores) are
//! external collaborators behind the same [`Exporter`] trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;

use crate::dispatch::{DispatchError, Exporter};

/// Exporter writing snapshots to a local directory.
pub struct FileExporter {
    dir: PathBuf,
}

impl std::fmt::Debug for FileExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileExporter")
            .field("dir", &self.dir)
            .finish()
    }
}

impl FileExporter {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Exporter for FileExporter {
    async fn setup(&self) -> Result<(), DispatchError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn export(&self, data: &[u8]) -> Result<(), DispatchError> {
        let name = format!("snapshot-{}.json", Utc::now().format("%Y%m%dT%H%M%SZ"));
        let path = self.dir.join(name);
        tokio::fs::write(&path, data).await?;
        tracing::info!(path = %path.display(), bytes = data.len(), "snapshot exported");
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), DispatchError> {
        // Nothing held open between cycles for local files.
        Ok(())
    }
}
