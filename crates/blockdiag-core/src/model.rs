// ABOUTME: Defines the diagnostic records: per-height entries, diagnostic runs, test results and errors.
// ABOUTME: These are the shapes that get cached in memory and serialized to one JSON file per block height.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Open-ended JSON mapping used for metadata and module configuration snapshots.
pub type Metadata = serde_json::Map<String, Value>;

/// The accumulated diagnostic state for one block height.
///
/// `time_end` is `None` while the entry is open and is set exactly once when
/// the entry is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDiagnosticEntry {
    pub height: u64,
    pub time_start: DateTime<Utc>,
    #[serde(default)]
    pub time_end: Option<DateTime<Utc>>,
    /// Runs grouped by diagnostic module name, in arrival order.
    #[serde(default)]
    pub diagnostics: BTreeMap<String, Vec<DiagnosticRun>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl BlockDiagnosticEntry {
    /// Create a new open entry for the given height, started now.
    pub fn new(height: u64) -> Self {
        Self {
            height,
            time_start: Utc::now(),
            time_end: None,
            diagnostics: BTreeMap::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.time_end.is_none()
    }

    pub fn is_finalized(&self) -> bool {
        self.time_end.is_some()
    }

    /// Total number of runs across all modules.
    pub fn run_count(&self) -> usize {
        self.diagnostics.values().map(Vec::len).sum()
    }
}

/// A single execution of one diagnostic module against a source object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRun {
    pub run_id: Ulid,
    pub height: u64,
    pub name: String,
    /// Snapshot of the module's configuration when the run was created.
    pub config: Metadata,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub source: Value,
    pub results: Vec<TestResult>,
}

impl DiagnosticRun {
    pub fn new(name: String, height: u64, config: Metadata, source: Value) -> Self {
        let now = Utc::now();
        Self {
            run_id: Ulid::new(),
            height,
            name,
            config,
            time_start: now,
            time_end: now,
            source,
            results: Vec::new(),
        }
    }

    /// Whether every recorded test passed. A run with no results counts as passing.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }
}

/// The outcome of one named test within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    pub time_start: DateTime<Utc>,
    #[serde(default)]
    pub time_end: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TestResult {
    /// Create a failing, unfinished result. Checks flip `success` and call
    /// [`TestResult::complete`] once they have decided.
    pub fn new(name: String) -> Self {
        Self {
            name,
            time_start: Utc::now(),
            time_end: None,
            success: false,
            metadata: Metadata::new(),
        }
    }

    /// Record the outcome and stamp the completion time.
    pub fn complete(mut self, success: bool) -> Self {
        self.success = success;
        self.time_end = Some(Utc::now());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// A standardized error record handed back to callers instead of a diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "error")]
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StructuredError {
    pub fn new(message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            message,
            metadata: Metadata::new(),
        }
    }
}
