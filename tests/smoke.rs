// ABOUTME: End-to-end smoke test for the block diagnostics write-back lifecycle.
// ABOUTME: Drives diagnose calls across heights and verifies the files written to a temp directory.

use std::path::Path;
use std::sync::Arc;

use blockdiag_core::{BlockDiagnostics, DiagnosticsConfig, DiagnosticsError};
use blockdiag_store::{DiagnosticsArchive, FsSink};
use serde_json::json;

fn config_for(root: &Path, modules: &[&str]) -> DiagnosticsConfig {
    let modules: String = if modules.is_empty() {
        " {}\n".to_string()
    } else {
        modules
            .iter()
            .map(|m| format!("\n    {}: {{ enabled: true }}", m))
            .collect()
    };
    let yaml = format!(
        "enabled: true\ndeployment:\n  name: litecoin\n  enabled: true\n  logPath: {}\n  modules:{}\n",
        root.display(),
        modules
    );
    DiagnosticsConfig::from_yaml_str(&yaml).unwrap()
}

#[tokio::test]
async fn smoke_test_height_boundaries() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path().join("logs");
    let diagnostics = BlockDiagnostics::new(
        config_for(&root, &["submitBlockSent", "submitBlockResult"]),
        Arc::new(FsSink::new()),
    );
    let archive = DiagnosticsArchive::new(&root, "litecoin");
    let cache = diagnostics.cache().expect("logging enabled").clone();

    // 1. First height: nothing to flush yet.
    let run1_source = json!({"height": 100, "data": "deadbeef"});
    let out = diagnostics
        .diagnose_submit_block_sent(run1_source.clone())
        .await
        .unwrap();
    assert_eq!(out, run1_source, "input is passed back unchanged");
    assert!(archive.list_heights().unwrap().is_empty());

    // 2. Next height: 100 is finalized, written and evicted.
    diagnostics
        .diagnose_submit_block_result(json!({"height": 101, "result": null}))
        .await
        .unwrap();

    assert_eq!(archive.list_heights().unwrap(), vec![100]);
    let entry = archive.load_entry(100).unwrap().expect("100.json written");
    assert!(entry.is_finalized());
    assert_eq!(entry.diagnostics.len(), 1);
    let runs = &entry.diagnostics["submitBlockSent"];
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].source, run1_source);
    assert!(!cache.contains(100).await.unwrap());

    // A second call at 101 does not rewrite 100.
    diagnostics
        .diagnose_submit_block_result(json!({"height": 101, "result": "duplicate"}))
        .await
        .unwrap();
    assert_eq!(archive.list_heights().unwrap(), vec![100]);

    // 3. Jump to 107: 101 is flushed and nothing at or below 101 stays cached.
    diagnostics
        .diagnose_submit_block_sent(json!({"height": 107, "data": "00"}))
        .await
        .unwrap();
    assert_eq!(archive.list_heights().unwrap(), vec![100, 101]);
    assert_eq!(
        archive.load_entry(101).unwrap().unwrap().diagnostics["submitBlockResult"].len(),
        2
    );
    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.cache.cached, 1);
    assert!(!cache.contains(101).await.unwrap());

    // 4. Late record for an already persisted height is dropped and counted.
    diagnostics
        .diagnose_submit_block_result(json!({"height": 100, "result": null}))
        .await
        .unwrap();
    assert_eq!(cache.stats().await.unwrap().cache.late_arrivals, 1);

    // 5. Shutdown flush persists the open height.
    let report = diagnostics.flush_all().await.unwrap();
    assert_eq!(report.written, vec![107]);
    assert_eq!(archive.list_heights().unwrap(), vec![100, 101, 107]);
}

#[tokio::test]
async fn smoke_test_disabled_is_passthrough() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path().join("logs");
    let diagnostics = BlockDiagnostics::new(config_for(&root, &[]), Arc::new(FsSink::new()));

    for height in 1..=3u64 {
        let input = json!({"height": height, "data": "00"});
        let out = diagnostics.diagnose_submit_block_sent(input.clone()).await.unwrap();
        assert_eq!(out, input);
    }
    diagnostics.flush_all().await.unwrap();

    assert!(DiagnosticsArchive::new(&root, "litecoin").list_heights().unwrap().is_empty());
}

#[tokio::test]
async fn smoke_test_write_failure_keeps_entry() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path().join("logs");
    // A file where the deployment directory should be makes every write fail.
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("litecoin"), b"blocker").unwrap();

    let diagnostics = BlockDiagnostics::new(
        config_for(&root, &["getBlockTemplateResult"]),
        Arc::new(FsSink::new()),
    );

    diagnostics
        .diagnose_get_block_template_result(json!({"height": 500}))
        .await
        .unwrap();
    let err = diagnostics
        .diagnose_get_block_template_result(json!({"height": 501}))
        .await
        .unwrap_err();

    assert!(
        matches!(err, DiagnosticsError::Persistence { height: 500, .. }),
        "expected persistence error, got: {}",
        err
    );
    let structured = err.to_structured(diagnostics.builder());
    assert_eq!(structured.metadata["height"], json!(500));

    let cache = diagnostics.cache().unwrap();
    let retained = cache.entry(500).await.unwrap().expect("500 retained after failed write");
    assert!(retained.is_finalized());

    // Once storage is fixed the caller can retry explicitly.
    std::fs::remove_file(root.join("litecoin")).unwrap();
    let report = diagnostics.flush_unpersisted().await.unwrap();
    assert_eq!(report.written, vec![500]);
    assert!(
        DiagnosticsArchive::new(&root, "litecoin")
            .load_entry(500)
            .unwrap()
            .is_some()
    );
}
