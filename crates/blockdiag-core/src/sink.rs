// ABOUTME: The persistence sink contract and the per-height file layout.
// ABOUTME: A sink performs one complete write per height and reports success or a typed failure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors a persistence sink can report.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write timed out after {0:?}")]
    TimedOut(Duration),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable storage for serialized block diagnostic entries.
///
/// Implementations must write `bytes` completely or fail; partial writes are
/// not acceptable.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn write(&self, path: &Path, bytes: Vec<u8>) -> Result<(), SinkError>;
}

/// Maps block heights to `<root>/<deployment>/<height>.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFileLayout {
    root: PathBuf,
    deployment: String,
}

impl BlockFileLayout {
    pub fn new(root: impl Into<PathBuf>, deployment: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            deployment: deployment.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn deployment_dir(&self) -> PathBuf {
        self.root.join(&self.deployment)
    }

    pub fn path_for(&self, height: u64) -> PathBuf {
        self.deployment_dir().join(format!("{}.json", height))
    }

    /// Parse the height back out of a `<height>.json` file name.
    pub fn height_from_path(path: &Path) -> Option<u64> {
        if path.extension()? != "json" {
            return None;
        }
        path.file_stem()?.to_str()?.parse().ok()
    }
}
