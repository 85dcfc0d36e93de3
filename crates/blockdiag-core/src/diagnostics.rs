// ABOUTME: Public entry point: one diagnose operation per daemon interaction, gated by configuration.
// ABOUTME: Disabled modules pass input straight through; enabled ones run checks and feed the cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actor::{self, CacheHandle, DiagnosticsStats};
use crate::builder::RecordBuilder;
use crate::checks;
use crate::config::{ConfigGate, DiagnosticsConfig, Scope};
use crate::error::DiagnosticsError;
use crate::flush::{FlushCoordinator, FlushReport};
use crate::sink::PersistenceSink;

/// The daemon interactions that can be diagnosed. Each maps to one
/// diagnostic module name in the configuration.
///
/// Naming follows `<daemon call><Sent|Result>`: `Sent` diagnoses what was
/// sent to the daemon, `Result` what came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DaemonCall {
    GetBlockTemplateResult,
    SubmitBlockSent,
    SubmitBlockResult,
}

impl DaemonCall {
    pub const ALL: [DaemonCall; 3] = [
        DaemonCall::GetBlockTemplateResult,
        DaemonCall::SubmitBlockSent,
        DaemonCall::SubmitBlockResult,
    ];

    pub fn module_name(self) -> &'static str {
        match self {
            DaemonCall::GetBlockTemplateResult => "getBlockTemplateResult",
            DaemonCall::SubmitBlockSent => "submitBlockSent",
            DaemonCall::SubmitBlockResult => "submitBlockResult",
        }
    }

    pub fn from_module_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|call| call.module_name() == name)
    }
}

/// Block diagnostics for one deployment.
///
/// Owns its configuration and, when logging is enabled, a cache actor that
/// persists one file per block height. Separate instances share nothing.
/// Must be created inside a tokio runtime.
pub struct BlockDiagnostics {
    gate: Arc<ConfigGate>,
    builder: RecordBuilder,
    cache: Option<CacheHandle>,
}

impl BlockDiagnostics {
    pub fn new(config: DiagnosticsConfig, sink: Arc<dyn PersistenceSink>) -> Self {
        let gate = Arc::new(ConfigGate::new(config));
        let builder = RecordBuilder::new(Arc::clone(&gate));
        let cache = FlushCoordinator::from_gate(&gate, sink)
            .map(|coordinator| actor::spawn(coordinator, builder.clone()));

        if gate.can_run(Scope::Deployment) {
            tracing::info!(
                deployment = gate.deployment_name(),
                logging = cache.is_some(),
                "block diagnostics enabled"
            );
        } else {
            tracing::debug!("block diagnostics disabled");
        }

        Self {
            gate,
            builder,
            cache,
        }
    }

    pub fn gate(&self) -> &ConfigGate {
        &self.gate
    }

    pub fn builder(&self) -> &RecordBuilder {
        &self.builder
    }

    /// The cache actor handle, present only when logging is enabled.
    pub fn cache(&self) -> Option<&CacheHandle> {
        self.cache.as_ref()
    }

    /// Diagnose one daemon interaction and return `input` unchanged.
    ///
    /// When the module is disabled at any scope the input is returned as-is
    /// without being inspected. Otherwise the input must carry an integer
    /// `height`; its checks are run and the run is cached, which may flush
    /// lower heights to storage.
    pub async fn diagnose(&self, call: DaemonCall, input: Value) -> Result<Value, DiagnosticsError> {
        let module = call.module_name();
        if !self.gate.can_run(Scope::Module(module)) {
            return Ok(input);
        }

        let height = input_height(&input)?;
        let mut run = self.builder.new_run(module, height, input.clone());
        checks::run_checks(&self.builder, call, &mut run);
        tracing::debug!(module, height, passed = run.all_passed(), "diagnostic run complete");

        if let Some(cache) = &self.cache {
            let report = cache.append(height, module, run).await?;
            if !report.flush.is_empty() {
                tracing::debug!(
                    written = ?report.flush.written,
                    swept = ?report.flush.swept,
                    "flush pass complete"
                );
            }
        }

        Ok(input)
    }

    pub async fn diagnose_get_block_template_result(&self, input: Value) -> Result<Value, DiagnosticsError> {
        self.diagnose(DaemonCall::GetBlockTemplateResult, input).await
    }

    pub async fn diagnose_submit_block_sent(&self, input: Value) -> Result<Value, DiagnosticsError> {
        self.diagnose(DaemonCall::SubmitBlockSent, input).await
    }

    pub async fn diagnose_submit_block_result(&self, input: Value) -> Result<Value, DiagnosticsError> {
        self.diagnose(DaemonCall::SubmitBlockResult, input).await
    }

    /// Retry every entry whose earlier write failed.
    pub async fn flush_unpersisted(&self) -> Result<FlushReport, DiagnosticsError> {
        match &self.cache {
            Some(cache) => cache.flush_unpersisted().await,
            None => Ok(FlushReport::default()),
        }
    }

    /// Persist everything still cached. Call before shutting down.
    pub async fn flush_all(&self) -> Result<FlushReport, DiagnosticsError> {
        match &self.cache {
            Some(cache) => cache.flush_all().await,
            None => Ok(FlushReport::default()),
        }
    }

    pub async fn stats(&self) -> Result<Option<DiagnosticsStats>, DiagnosticsError> {
        match &self.cache {
            Some(cache) => Ok(Some(cache.stats().await?)),
            None => Ok(None),
        }
    }
}

fn input_height(input: &Value) -> Result<u64, DiagnosticsError> {
    match input.get("height") {
        Some(height) => height.as_u64().ok_or_else(|| {
            DiagnosticsError::MalformedInput(format!("height must be a non-negative integer, got {}", height))
        }),
        None => Err(DiagnosticsError::MalformedInput(
            "input has no height field".to_string(),
        )),
    }
}
