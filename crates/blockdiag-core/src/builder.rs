// ABOUTME: Constructs diagnostic records (entries, runs, results, errors) with timestamps and defaults.
// ABOUTME: Runs embed a snapshot of their module's configuration taken from the configuration gate.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ConfigGate;
use crate::model::{BlockDiagnosticEntry, DiagnosticRun, StructuredError, TestResult};

const UNKNOWN: &str = "unknown";

fn name_or_unknown(name: &str) -> String {
    if name.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        name.to_string()
    }
}

/// Builds records for one deployment. Holds the gate only to snapshot module
/// configuration into new runs. The default builder has an empty gate.
#[derive(Debug, Clone, Default)]
pub struct RecordBuilder {
    gate: Arc<ConfigGate>,
}

impl RecordBuilder {
    pub fn new(gate: Arc<ConfigGate>) -> Self {
        Self { gate }
    }

    pub fn new_entry(&self, height: u64) -> BlockDiagnosticEntry {
        BlockDiagnosticEntry::new(height)
    }

    pub fn new_run(&self, module_name: &str, height: u64, source: Value) -> DiagnosticRun {
        let name = name_or_unknown(module_name);
        let config = self.gate.module_config(&name);
        DiagnosticRun::new(name, height, config, source)
    }

    pub fn new_result(&self, test_name: &str) -> TestResult {
        TestResult::new(name_or_unknown(test_name))
    }

    pub fn new_error(&self, message: &str) -> StructuredError {
        StructuredError::new(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticsConfig;
    use serde_json::json;

    fn builder_with_module() -> RecordBuilder {
        let config = DiagnosticsConfig::from_yaml_str(
            r#"
enabled: true
deployment:
  enabled: true
  modules:
    submitBlockSent: { enabled: true, verbose: true }
"#,
        )
        .unwrap();
        RecordBuilder::new(Arc::new(ConfigGate::new(config)))
    }

    #[test]
    fn new_run_snapshots_module_config() {
        let builder = builder_with_module();
        let run = builder.new_run("submitBlockSent", 500, json!({"height": 500}));

        assert_eq!(run.name, "submitBlockSent");
        assert_eq!(run.height, 500);
        assert_eq!(run.config.get("verbose"), Some(&json!(true)));
        assert_eq!(run.source["height"], json!(500));
        assert!(run.results.is_empty());
        assert!(run.time_start <= run.time_end);
    }

    #[test]
    fn new_run_for_unconfigured_module_has_empty_config() {
        let builder = builder_with_module();
        let run = builder.new_run("submitBlockResult", 1, Value::Null);
        assert!(run.config.is_empty());
    }

    #[test]
    fn blank_names_default_to_unknown() {
        let builder = builder_with_module();
        assert_eq!(builder.new_run("", 1, Value::Null).name, "unknown");
        assert_eq!(builder.new_result("  ").name, "unknown");
    }

    #[test]
    fn new_entry_and_error_are_stamped() {
        let builder = builder_with_module();
        let entry = builder.new_entry(9);
        assert!(entry.is_open());

        let err = builder.new_error("boom");
        assert_eq!(err.message, "boom");
        assert!(err.timestamp >= entry.time_start);
    }
}
