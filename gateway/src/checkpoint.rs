//! Persistence of the last delivered block.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

type Result<T, E = CheckpointError> = std::result::Result<T, E>;

/// Representation of all the errors that can occur when interacting with a [`Checkpointer`].
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid checkpoint: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage of the block listening position.
#[async_trait]
pub trait Checkpointer: Send + Sync + 'static {
    /// Number of the last delivered block, if any.
    async fn block_number(&self) -> Result<Option<u64>>;

    /// Record `block_number` as delivered.
    async fn set_block_number(&self, block_number: u64) -> Result<()>;
}

/// Checkpointer keeping the position in memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    block_number: Mutex<Option<u64>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        InMemoryCheckpointer::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn block_number(&self) -> Result<Option<u64>> {
        Ok(*self.block_number.lock().expect("lock failed"))
    }

    async fn set_block_number(&self, block_number: u64) -> Result<()> {
        *self.block_number.lock().expect("lock failed") = Some(block_number);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointFile {
    block_number: u64,
}

/// Checkpointer persisting the position in a JSON file.
///
/// The file is replaced atomically on every update, so a crash leaves either
/// the old or the new position behind.
#[derive(Debug)]
pub struct FileCheckpointer {
    path: PathBuf,
    tmp_path: PathBuf,
    block_number: tokio::sync::Mutex<Option<u64>>,
}

impl FileCheckpointer {
    /// Open the checkpoint stored at `path`, creating its directory if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let block_number = match fs::read(&path).await {
            Ok(bytes) => Some(serde_json::from_slice::<CheckpointFile>(&bytes)?.block_number),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        debug!("Opened checkpoint {} at block {block_number:?}", path.display());

        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");

        Ok(FileCheckpointer {
            path,
            tmp_path: tmp_path.into(),
            block_number: tokio::sync::Mutex::new(block_number),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn block_number(&self) -> Result<Option<u64>> {
        Ok(*self.block_number.lock().await)
    }

    async fn set_block_number(&self, block_number: u64) -> Result<()> {
        // Held across the writes, so concurrent updates can't interleave.
        let mut current = self.block_number.lock().await;

        let json = serde_json::to_vec(&CheckpointFile { block_number })?;
        fs::write(&self.tmp_path, json).await?;
        fs::rename(&self.tmp_path, &self.path).await?;

        *current = Some(block_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::async_test;
    use tempfile::TempDir;

    #[async_test]
    async fn in_memory() {
        let checkpointer = InMemoryCheckpointer::new();
        assert_eq!(checkpointer.block_number().await.unwrap(), None);

        checkpointer.set_block_number(5).await.unwrap();
        checkpointer.set_block_number(6).await.unwrap();
        assert_eq!(checkpointer.block_number().await.unwrap(), Some(6));
    }

    #[async_test]
    async fn file_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints").join("blocks.json");

        let checkpointer = FileCheckpointer::open(&path).await.unwrap();
        assert_eq!(checkpointer.block_number().await.unwrap(), None);

        checkpointer.set_block_number(u64::MAX - 1).await.unwrap();
        drop(checkpointer);

        let checkpointer = FileCheckpointer::open(&path).await.unwrap();
        assert_eq!(checkpointer.block_number().await.unwrap(), Some(u64::MAX - 1));
    }

    #[async_test]
    async fn file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks.json");

        let checkpointer = FileCheckpointer::open(&path).await.unwrap();
        checkpointer.set_block_number(42).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "blockNumber": 42 }));
        assert!(!checkpointer.tmp_path.exists());
    }

    #[async_test]
    async fn corrupted_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks.json");
        fs::write(&path, b"{\"blockNumber\": -1}").await.unwrap();

        let error = FileCheckpointer::open(&path).await.unwrap_err();
        assert!(matches!(error, CheckpointError::Json(_)));
    }
}
