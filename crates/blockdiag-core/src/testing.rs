// ABOUTME: Test utilities for blockdiag, including an in-memory persistence sink.
// ABOUTME: Used in tests to observe flushes and to simulate failing or slow storage.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::model::BlockDiagnosticEntry;
use crate::sink::{PersistenceSink, SinkError};

/// A sink that keeps every write in memory.
///
/// Writes are recorded in order, so tests can assert both what was persisted
/// and how many times. Flip [`MemorySink::set_failing`] to make subsequent
/// writes fail with an I/O error.
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes fail until `set_failing(false)` is called.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    /// Sleep for `delay` before each write completes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Paths written so far, in write order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.writes
            .lock()
            .map(|w| w.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// Decode the most recent write to `path`.
    pub fn entry_at(&self, path: &Path) -> Option<BlockDiagnosticEntry> {
        let writes = self.writes.lock().ok()?;
        let (_, bytes) = writes.iter().rev().find(|(p, _)| p == path)?;
        serde_json::from_slice(bytes).ok()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn write(&self, path: &Path, bytes: Vec<u8>) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Io(std::io::Error::other("memory sink set to fail")));
        }
        self.writes
            .lock()
            .map_err(|_| SinkError::Backend("memory sink lock poisoned".to_string()))?
            .push((path.to_path_buf(), bytes));
        Ok(())
    }
}
