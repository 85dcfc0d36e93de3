// ABOUTME: Core library for blockdiag, containing the diagnostic data model and the write-back cache.
// ABOUTME: Defines records, the configuration gate, the cache store, the flush protocol and the cache actor.

pub mod actor;
pub mod builder;
pub mod cache;
pub mod checks;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod flush;
pub mod model;
pub mod sink;
pub mod testing;

pub use actor::{AppendReport, CacheHandle, DiagnosticsStats};
pub use builder::RecordBuilder;
pub use cache::{AppendOutcome, CacheStats, CacheStore};
pub use config::{ConfigError, ConfigGate, DeploymentConfig, DiagnosticsConfig, FlushPolicy, Scope};
pub use diagnostics::{BlockDiagnostics, DaemonCall};
pub use error::DiagnosticsError;
pub use flush::{FlushCoordinator, FlushReport, FlushStats};
pub use model::{BlockDiagnosticEntry, DiagnosticRun, Metadata, StructuredError, TestResult};
pub use sink::{BlockFileLayout, PersistenceSink, SinkError};
