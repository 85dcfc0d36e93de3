// ABOUTME: Write-back flush protocol: finalizes lower heights when a new height arrives and persists them.
// ABOUTME: Evicts persisted entries, sweeps the retention window, and keeps failed entries for explicit retry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cache::CacheStore;
use crate::config::{ConfigGate, FlushPolicy};
use crate::error::DiagnosticsError;
use crate::sink::{BlockFileLayout, PersistenceSink, SinkError};

/// Heights touched by one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// Heights written to the sink and evicted, in write order.
    pub written: Vec<u64>,
    /// Heights dropped by the retention sweep.
    pub swept: Vec<u64>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.swept.is_empty()
    }

    fn absorb(&mut self, other: FlushReport) {
        self.written.extend(other.written);
        self.swept.extend(other.swept);
    }
}

/// Running totals across the coordinator's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushStats {
    pub written: u64,
    pub failed: u64,
    pub swept: u64,
}

type WriteTask = JoinHandle<Result<(), SinkError>>;

/// Decides when cached entries are complete, writes them to the sink, and
/// evicts them. Borrows the cache for the duration of each call only.
pub struct FlushCoordinator {
    sink: Arc<dyn PersistenceSink>,
    layout: BlockFileLayout,
    policy: FlushPolicy,
    retention_window: u64,
    write_timeout: Duration,
    stats: FlushStats,
    /// Writes that outlived the timeout and may still land. A height listed
    /// here is never submitted again until its task has finished.
    in_flight: BTreeMap<u64, WriteTask>,
}

impl FlushCoordinator {
    pub fn new(
        sink: Arc<dyn PersistenceSink>,
        layout: BlockFileLayout,
        policy: FlushPolicy,
        retention_window: u64,
        write_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            layout,
            policy,
            retention_window,
            write_timeout,
            stats: FlushStats::default(),
            in_flight: BTreeMap::new(),
        }
    }

    /// Build a coordinator from the gate's settings. Returns `None` when
    /// logging is disabled, since there is nowhere to write.
    pub fn from_gate(gate: &ConfigGate, sink: Arc<dyn PersistenceSink>) -> Option<Self> {
        if !gate.logging_enabled() {
            return None;
        }
        let root = gate.log_root()?;
        Some(Self::new(
            sink,
            BlockFileLayout::new(root, gate.deployment_name()),
            gate.flush_policy(),
            gate.retention_window(),
            gate.write_timeout(),
        ))
    }

    pub fn layout(&self) -> &BlockFileLayout {
        &self.layout
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    /// Heights that become complete once `height` has been appended.
    /// Only open entries qualify, so a height whose write already failed is
    /// not retried implicitly.
    pub fn candidates(&self, cache: &CacheStore, height: u64) -> Vec<u64> {
        match self.policy {
            FlushPolicy::AnyLower => cache.open_heights_below(height),
            FlushPolicy::Predecessor => height
                .checked_sub(1)
                .filter(|prior| cache.get(*prior).is_some_and(|e| e.is_open()))
                .into_iter()
                .collect(),
        }
    }

    /// Run after every accepted append at `height`. Stops at the first failed
    /// write and returns it; that entry stays cached as finalized.
    pub async fn after_append(
        &mut self,
        cache: &mut CacheStore,
        height: u64,
    ) -> Result<FlushReport, DiagnosticsError> {
        let mut report = FlushReport::default();
        for prior in self.candidates(cache, height) {
            self.flush_height(cache, prior).await?;
            report.written.push(prior);
            report.swept.extend(self.sweep(cache, height));
        }
        Ok(report)
    }

    /// Re-submit every finalized entry still in the cache.
    pub async fn flush_unpersisted(
        &mut self,
        cache: &mut CacheStore,
    ) -> Result<FlushReport, DiagnosticsError> {
        let mut report = FlushReport::default();
        for height in cache.unpersisted_heights() {
            self.flush_height(cache, height).await?;
            report.written.push(height);
        }
        Ok(report)
    }

    /// Finalize and persist everything, open entries included. Used at shutdown.
    pub async fn flush_all(&mut self, cache: &mut CacheStore) -> Result<FlushReport, DiagnosticsError> {
        let mut report = self.flush_unpersisted(cache).await?;
        let mut rest = FlushReport::default();
        for height in cache.heights() {
            self.flush_height(cache, height).await?;
            rest.written.push(height);
        }
        report.absorb(rest);
        Ok(report)
    }

    /// Heights whose timed-out write has not been observed to finish yet.
    pub fn in_flight_heights(&self) -> Vec<u64> {
        self.in_flight.keys().copied().collect()
    }

    /// finalize -> serialize -> write -> evict for one height.
    async fn flush_height(&mut self, cache: &mut CacheStore, height: u64) -> Result<(), DiagnosticsError> {
        cache.finalize(height);
        let bytes = match cache.get(height) {
            Some(entry) => serde_json::to_vec_pretty(entry)?,
            None => return Ok(()),
        };
        let path = self.layout.path_for(height);

        let result = match self.in_flight.remove(&height) {
            Some(task) => {
                tracing::debug!(height, "waiting on a write that outlived its timeout");
                match self.await_write(height, task).await {
                    Err(source) if !self.in_flight.contains_key(&height) => {
                        tracing::warn!(height, error = %source, "earlier write failed, writing again");
                        self.write(height, &path, bytes).await
                    }
                    landed => landed,
                }
            }
            None => self.write(height, &path, bytes).await,
        };

        match result {
            Ok(()) => {
                cache.evict(height);
                self.stats.written += 1;
                tracing::info!(height, path = %path.display(), "flushed block diagnostics");
                Ok(())
            }
            Err(source) => {
                self.stats.failed += 1;
                tracing::error!(height, path = %path.display(), error = %source, "failed to flush block diagnostics");
                Err(DiagnosticsError::Persistence { height, path, source })
            }
        }
    }

    async fn write(&mut self, height: u64, path: &Path, bytes: Vec<u8>) -> Result<(), SinkError> {
        let sink = Arc::clone(&self.sink);
        let path = path.to_path_buf();
        let task = tokio::spawn(async move { sink.write(&path, bytes).await });
        self.await_write(height, task).await
    }

    /// Wait up to the write timeout for `task`. The sink keeps running past
    /// the deadline, so an unfinished task is parked in `in_flight`.
    async fn await_write(&mut self, height: u64, mut task: WriteTask) -> Result<(), SinkError> {
        match tokio::time::timeout(self.write_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SinkError::Backend(format!("write task failed: {}", e))),
            Err(_) => {
                self.in_flight.insert(height, task);
                Err(SinkError::TimedOut(self.write_timeout))
            }
        }
    }

    /// Evict everything at or below `(height - 1) - retention_window`.
    /// Persisted entries are evicted on write, so whatever is left here was
    /// never persisted.
    fn sweep(&mut self, cache: &mut CacheStore, height: u64) -> Vec<u64> {
        let Some(boundary) = height
            .checked_sub(1)
            .and_then(|prior| prior.checked_sub(self.retention_window))
        else {
            return Vec::new();
        };

        let swept: Vec<u64> = cache
            .evict_at_or_below(boundary)
            .into_iter()
            .map(|e| e.height)
            .collect();
        if !swept.is_empty() {
            tracing::warn!(
                boundary,
                heights = ?swept,
                "retention sweep dropped entries that were never persisted"
            );
        }
        for height in &swept {
            // Dropping the handle detaches the task; it still runs to completion.
            self.in_flight.remove(height);
        }
        self.stats.swept += swept.len() as u64;
        swept
    }

    pub fn path_for(&self, height: u64) -> PathBuf {
        self.layout.path_for(height)
    }
}
