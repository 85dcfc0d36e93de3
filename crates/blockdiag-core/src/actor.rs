// ABOUTME: Async actor that exclusively owns the diagnostics cache and runs the flush protocol.
// ABOUTME: Provides CacheHandle for appending runs, inspecting entries, and forcing flushes.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::builder::RecordBuilder;
use crate::cache::{AppendOutcome, CacheStats, CacheStore};
use crate::error::DiagnosticsError;
use crate::flush::{FlushCoordinator, FlushReport, FlushStats};
use crate::model::{BlockDiagnosticEntry, DiagnosticRun};

/// Result of an append: what the cache did with the run, and what the
/// flush pass it triggered wrote or swept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendReport {
    pub outcome: AppendOutcome,
    pub flush: FlushReport,
}

/// Cache and flush counters combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagnosticsStats {
    pub cache: CacheStats,
    pub flush: FlushStats,
}

type Reply<T> = oneshot::Sender<T>;

/// Requests processed by the actor, each carrying its own reply channel.
enum Request {
    Append {
        height: u64,
        module: String,
        run: DiagnosticRun,
        reply: Reply<Result<AppendReport, DiagnosticsError>>,
    },
    Finalize {
        height: u64,
        reply: Reply<bool>,
    },
    Evict {
        height: u64,
        reply: Reply<Option<BlockDiagnosticEntry>>,
    },
    Entry {
        height: u64,
        reply: Reply<Option<BlockDiagnosticEntry>>,
    },
    Contains {
        height: u64,
        reply: Reply<bool>,
    },
    Stats {
        reply: Reply<DiagnosticsStats>,
    },
    FlushUnpersisted {
        reply: Reply<Result<FlushReport, DiagnosticsError>>,
    },
    FlushAll {
        reply: Reply<Result<FlushReport, DiagnosticsError>>,
    },
}

/// Cloneable handle to the cache actor. The actor stops once every handle
/// has been dropped.
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<Request>,
}

impl CacheHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T, DiagnosticsError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .await
            .map_err(|_| DiagnosticsError::ChannelClosed)?;
        rx.await.map_err(|_| DiagnosticsError::ChannelClosed)
    }

    /// Append a run and let the flush protocol react to it. A failed flush of
    /// a lower height surfaces here as `DiagnosticsError::Persistence`; the
    /// run itself has still been cached.
    pub async fn append(
        &self,
        height: u64,
        module: &str,
        run: DiagnosticRun,
    ) -> Result<AppendReport, DiagnosticsError> {
        let module = module.to_string();
        self.request(|reply| Request::Append {
            height,
            module,
            run,
            reply,
        })
        .await?
    }

    pub async fn finalize(&self, height: u64) -> Result<bool, DiagnosticsError> {
        self.request(|reply| Request::Finalize { height, reply }).await
    }

    pub async fn evict(&self, height: u64) -> Result<Option<BlockDiagnosticEntry>, DiagnosticsError> {
        self.request(|reply| Request::Evict { height, reply }).await
    }

    /// A copy of the cached entry for `height`, if any.
    pub async fn entry(&self, height: u64) -> Result<Option<BlockDiagnosticEntry>, DiagnosticsError> {
        self.request(|reply| Request::Entry { height, reply }).await
    }

    pub async fn contains(&self, height: u64) -> Result<bool, DiagnosticsError> {
        self.request(|reply| Request::Contains { height, reply }).await
    }

    pub async fn stats(&self) -> Result<DiagnosticsStats, DiagnosticsError> {
        self.request(|reply| Request::Stats { reply }).await
    }

    pub async fn flush_unpersisted(&self) -> Result<FlushReport, DiagnosticsError> {
        self.request(|reply| Request::FlushUnpersisted { reply }).await?
    }

    pub async fn flush_all(&self) -> Result<FlushReport, DiagnosticsError> {
        self.request(|reply| Request::FlushAll { reply }).await?
    }
}

/// Spawn the cache actor and return a handle to it. Cache entries are
/// created through `builder`.
pub fn spawn(coordinator: FlushCoordinator, builder: RecordBuilder) -> CacheHandle {
    let (tx, rx) = mpsc::channel::<Request>(256);
    let actor = CacheActor {
        cache: CacheStore::with_builder(builder),
        coordinator,
        rx,
    };
    tokio::spawn(actor.run());
    CacheHandle { tx }
}

/// Processes requests one at a time, so a flush (including the sink write)
/// completes before any other mutation is looked at.
struct CacheActor {
    cache: CacheStore,
    coordinator: FlushCoordinator,
    rx: mpsc::Receiver<Request>,
}

impl CacheActor {
    async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            self.handle(request).await;
        }
        let stats = self.cache.stats();
        if stats.cached > 0 {
            tracing::warn!(
                cached = stats.cached,
                unpersisted = stats.unpersisted,
                "diagnostics cache shut down with entries still in memory"
            );
        }
    }

    // Send errors are ignored throughout: the caller may have dropped its receiver.
    async fn handle(&mut self, request: Request) {
        match request {
            Request::Append {
                height,
                module,
                run,
                reply,
            } => {
                let result = self.append(height, &module, run).await;
                let _ = reply.send(result);
            }
            Request::Finalize { height, reply } => {
                let _ = reply.send(self.cache.finalize(height));
            }
            Request::Evict { height, reply } => {
                let _ = reply.send(self.cache.evict(height));
            }
            Request::Entry { height, reply } => {
                let _ = reply.send(self.cache.get(height).cloned());
            }
            Request::Contains { height, reply } => {
                let _ = reply.send(self.cache.contains(height));
            }
            Request::Stats { reply } => {
                let _ = reply.send(DiagnosticsStats {
                    cache: self.cache.stats(),
                    flush: self.coordinator.stats(),
                });
            }
            Request::FlushUnpersisted { reply } => {
                let result = self.coordinator.flush_unpersisted(&mut self.cache).await;
                let _ = reply.send(result);
            }
            Request::FlushAll { reply } => {
                let result = self.coordinator.flush_all(&mut self.cache).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn append(
        &mut self,
        height: u64,
        module: &str,
        run: DiagnosticRun,
    ) -> Result<AppendReport, DiagnosticsError> {
        let outcome = self.cache.append(height, module, run);
        let flush = match outcome {
            AppendOutcome::Accepted => self.coordinator.after_append(&mut self.cache, height).await?,
            AppendOutcome::LateArrival => FlushReport::default(),
        };
        Ok(AppendReport { outcome, flush })
    }
}
