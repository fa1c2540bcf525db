//! Plain-text and JSON rendering of a settled analysis.

use std::fmt::Write as _;

use labelcheck_client::controller::AnalysisSnapshot;
use labelcheck_core::result::{Outcome, ResultRecord};

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "PASS",
        Outcome::NeedsReview => "REVIEW",
        Outcome::Rejected => "FAIL",
        Outcome::Errored => "ERROR",
    }
}

/// One line per record with its issues indented underneath, then the
/// diagnostics and a summary line.
pub fn render_text(snapshot: &AnalysisSnapshot) -> String {
    let mut out = String::new();

    for (index, record) in &snapshot.records {
        let _ = writeln!(out, "[{:>3}] {:<6} {}", index.get(), outcome_label(record.outcome()), record.filename());
        match record {
            ResultRecord::Success(result) => {
                for issue in &result.compliance.issues {
                    let _ = writeln!(out, "        {}: {}", issue.field, issue.message);
                }
                if let Some(comparison) = &result.comparison {
                    if let Some(row) = &comparison.matched_row {
                        let _ = writeln!(out, "        matched reference row {row}");
                    }
                }
            }
            ResultRecord::Failure(failure) => {
                let _ = writeln!(out, "        {}", failure.message);
            }
        }
    }

    for diagnostic in &snapshot.diagnostics {
        let _ = writeln!(out, "note: {diagnostic}");
    }
    if let Some(error) = &snapshot.error {
        let _ = writeln!(out, "error: {error}");
    }
    if snapshot.status.is_active() {
        let _ = writeln!(
            out,
            "incomplete: {} of {} results received",
            snapshot.progress, snapshot.total_files
        );
    }

    let summary = snapshot.summary();
    let _ = write!(
        out,
        "{}/{} analysed: {} passed, {} need review, {} failed, {} errored",
        snapshot.progress,
        snapshot.total_files,
        summary.passed,
        summary.needs_review,
        summary.rejected,
        summary.errored,
    );
    if let Some(elapsed) = snapshot.elapsed {
        let _ = write!(out, " in {:.1}s", elapsed.as_secs_f64());
    }
    out.push('\n');
    out
}

/// Machine-readable form of the same report.
pub fn render_json(snapshot: &AnalysisSnapshot) -> serde_json::Value {
    let records: Vec<serde_json::Value> = snapshot
        .records
        .iter()
        .map(|(index, record)| {
            serde_json::json!({
                "client_index": index,
                "outcome": record.outcome(),
                "record": record,
            })
        })
        .collect();

    serde_json::json!({
        "status": snapshot.status.to_string(),
        "job_id": snapshot.job_id,
        "total_files": snapshot.total_files,
        "elapsed_ms": snapshot.elapsed.map(|e| e.as_millis() as u64),
        "summary": snapshot.summary(),
        "records": records,
        "diagnostics": snapshot.diagnostics.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "error": snapshot.error,
    })
}
