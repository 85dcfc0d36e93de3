// ABOUTME: Reads and prepares the on-disk diagnostics archive for one deployment.
// ABOUTME: Handles deployment directory creation, height discovery, and loading persisted entries.

use std::fs;
use std::path::{Path, PathBuf};

use blockdiag_core::model::BlockDiagnosticEntry;
use blockdiag_core::sink::BlockFileLayout;
use thiserror::Error;

/// Errors that can occur while reading the archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The `<root>/<deployment>/<height>.json` tree written by [`crate::FsSink`].
pub struct DiagnosticsArchive {
    layout: BlockFileLayout,
}

impl DiagnosticsArchive {
    pub fn new(root: impl Into<PathBuf>, deployment: impl Into<String>) -> Self {
        Self {
            layout: BlockFileLayout::new(root, deployment),
        }
    }

    pub fn layout(&self) -> &BlockFileLayout {
        &self.layout
    }

    /// Create the deployment directory if it does not exist yet.
    pub fn ensure_deployment_dir(&self) -> Result<PathBuf, ArchiveError> {
        let dir = self.layout.deployment_dir();
        crate::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Heights with a persisted file, ascending. Files that do not look like
    /// `<height>.json` are skipped.
    pub fn list_heights(&self) -> Result<Vec<u64>, ArchiveError> {
        let dir = self.layout.deployment_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut heights = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match BlockFileLayout::height_from_path(&path) {
                Some(height) => heights.push(height),
                None => tracing::debug!("skipping non-diagnostic file {}", path.display()),
            }
        }
        heights.sort_unstable();
        Ok(heights)
    }

    /// Load the persisted entry for `height`, or `None` if no file exists.
    pub fn load_entry(&self, height: u64) -> Result<Option<BlockDiagnosticEntry>, ArchiveError> {
        let path = self.layout.path_for(height);
        if !path.exists() {
            return Ok(None);
        }
        load_file(&path).map(Some)
    }
}

fn load_file(path: &Path) -> Result<BlockDiagnosticEntry, ArchiveError> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })
}
