// ABOUTME: The diagnostic checks run against each daemon interaction, grouped per diagnostic module.
// ABOUTME: Each check inspects one thing about the run's source and yields a single TestResult.

use serde_json::Value;

use crate::builder::RecordBuilder;
use crate::diagnostics::DaemonCall;
use crate::model::{DiagnosticRun, TestResult};

/// A single test. Receives the whole run so it can read the module config
/// snapshot and any results gathered so far.
pub type Check = fn(&RecordBuilder, &DiagnosticRun) -> TestResult;

const GET_BLOCK_TEMPLATE_RESULT: &[Check] = &[
    source_present,
    has_previous_block_hash,
    has_transactions,
    height_matches,
];
const SUBMIT_BLOCK_SENT: &[Check] = &[source_present, has_block_hex];
const SUBMIT_BLOCK_RESULT: &[Check] = &[source_present, accepted];

pub fn checks_for(call: DaemonCall) -> &'static [Check] {
    match call {
        DaemonCall::GetBlockTemplateResult => GET_BLOCK_TEMPLATE_RESULT,
        DaemonCall::SubmitBlockSent => SUBMIT_BLOCK_SENT,
        DaemonCall::SubmitBlockResult => SUBMIT_BLOCK_RESULT,
    }
}

/// Run every check for `call`, appending results in order, and stamp the
/// run's end time.
pub fn run_checks(builder: &RecordBuilder, call: DaemonCall, run: &mut DiagnosticRun) {
    for check in checks_for(call) {
        let result = check(builder, run);
        run.results.push(result);
    }
    run.time_end = chrono::Utc::now();
}

fn source_present(builder: &RecordBuilder, run: &DiagnosticRun) -> TestResult {
    builder.new_result("sourcePresent").complete(!run.source.is_null())
}

fn has_previous_block_hash(builder: &RecordBuilder, run: &DiagnosticRun) -> TestResult {
    let hash = run.source.get("previousblockhash").and_then(Value::as_str);
    builder.new_result("hasPreviousBlockHash").complete(hash.is_some_and(is_hex))
}

fn has_transactions(builder: &RecordBuilder, run: &DiagnosticRun) -> TestResult {
    let minimum = run
        .config
        .get("minTransactions")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let count = run
        .source
        .get("transactions")
        .and_then(Value::as_array)
        .map(Vec::len);

    let result = builder.new_result("hasTransactions").with_metadata("minimum", minimum);
    match count {
        Some(count) => result
            .with_metadata("count", count as u64)
            .complete(count as u64 >= minimum),
        None => result.complete(false),
    }
}

fn height_matches(builder: &RecordBuilder, run: &DiagnosticRun) -> TestResult {
    let reported = run.source.get("height").and_then(Value::as_u64);
    builder.new_result("heightMatches")
        .with_metadata("expected", run.height)
        .complete(reported == Some(run.height))
}

fn has_block_hex(builder: &RecordBuilder, run: &DiagnosticRun) -> TestResult {
    let hex = ["data", "hex"]
        .iter()
        .find_map(|key| run.source.get(*key).and_then(Value::as_str));
    let result = builder.new_result("hasBlockHex");
    match hex {
        Some(hex) => result
            .with_metadata("length", hex.len() as u64)
            .complete(!hex.is_empty() && is_hex(hex)),
        None => result.complete(false),
    }
}

/// `submitblock` answers `null` on acceptance and a reason string otherwise.
fn accepted(builder: &RecordBuilder, run: &DiagnosticRun) -> TestResult {
    let result = run.source.get("result").unwrap_or(&Value::Null);
    let error = run.source.get("error").unwrap_or(&Value::Null);
    let mut test = builder.new_result("accepted");
    if let Some(reason) = result.as_str() {
        test = test.with_metadata("reason", reason);
    }
    if !error.is_null() {
        test = test.with_metadata("error", error.clone());
    }
    test.complete(result.is_null() && error.is_null())
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}
