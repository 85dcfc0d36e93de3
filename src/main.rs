// ABOUTME: Entry point for the blockdiag binary.
// ABOUTME: Loads config, initializes tracing, diagnoses daemon interactions read from stdin, and flushes on exit.

use std::sync::Arc;

use anyhow::Context;
use blockdiag_core::{BlockDiagnostics, DaemonCall, DiagnosticsConfig};
use blockdiag_store::{DiagnosticsArchive, FsSink};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// One daemon interaction, as read from a line of stdin.
#[derive(Debug, Deserialize)]
struct Interaction {
    call: String,
    data: Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blockdiag=info,blockdiag_core=info,blockdiag_store=info".into()),
        )
        .init();

    let config = DiagnosticsConfig::from_env().context("loading diagnostics config")?;
    let diagnostics = BlockDiagnostics::new(config, Arc::new(FsSink::new()));

    let gate = diagnostics.gate();
    if let Some(root) = gate.log_root().filter(|_| gate.logging_enabled()) {
        let dir = DiagnosticsArchive::new(root, gate.deployment_name())
            .ensure_deployment_dir()
            .context("creating diagnostics directory")?;
        tracing::info!("writing block diagnostics under {}", dir.display());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let interaction: Interaction = match serde_json::from_str(&line) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!("skipping unparseable line: {}", e);
                continue;
            }
        };
        let Some(call) = DaemonCall::from_module_name(&interaction.call) else {
            tracing::warn!("unknown daemon call {}, passing through", interaction.call);
            emit(&mut stdout, &interaction.data).await?;
            continue;
        };

        match diagnostics.diagnose(call, interaction.data).await {
            Ok(output) => emit(&mut stdout, &output).await?,
            Err(e) => eprintln!("{}", serde_json::to_string(&e.to_structured(diagnostics.builder()))?),
        }
    }

    let report = diagnostics.flush_all().await.context("flushing diagnostics on shutdown")?;
    if let Some(stats) = diagnostics.stats().await? {
        tracing::info!(
            flushed_on_exit = report.written.len(),
            written = stats.flush.written,
            failed = stats.flush.failed,
            late_arrivals = stats.cache.late_arrivals,
            "blockdiag shutting down"
        );
    }

    Ok(())
}

async fn emit(stdout: &mut tokio::io::Stdout, value: &Value) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}
