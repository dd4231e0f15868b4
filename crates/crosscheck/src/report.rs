//! Plain-text result file writer.
//!
//! One block per check statement with its outcome, duration and any
//! error/diff detail, followed by per-case totals. This is the on-disk
//! artifact of a run; rich report rendering is the caller's business.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::CheckError;
use crate::runner::{RunSummary, TestResult};

/// Render a run summary as plain text.
pub fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    for case in &summary.cases {
        render_case(&mut out, case);
    }
    let _ = writeln!(
        out,
        "overall: {} cases, {} failed, finished in {:.1}s",
        summary.cases.len(),
        summary.failed_cases(),
        summary.elapsed.as_secs_f64(),
    );
    out
}

fn render_case(out: &mut String, case: &TestResult) {
    let _ = writeln!(out, "=== case {} ===", case.case);
    if case.skipped {
        let _ = writeln!(out, "skipped\n");
        return;
    }
    if let Some(reason) = &case.aborted {
        let _ = writeln!(out, "aborted: {reason}\n");
        return;
    }
    for result in &case.results {
        let _ = writeln!(
            out,
            "[{}] {} ({:.2}s)\nSQL: {}",
            result.statement_id,
            result.outcome,
            result.duration.as_secs_f64(),
            result.sql,
        );
        for (engine, message) in &result.engine_errors {
            let _ = writeln!(out, "{engine} error: {message}");
        }
        if let Some(detail) = &result.diff_detail {
            let _ = writeln!(out, "{detail}");
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "case {}: {} passed, {} failed, {} unsuitable of {} in {:.1}s\n",
        case.case, case.passed, case.failed, case.unsuitable, case.total,
        case.elapsed.as_secs_f64(),
    );
}

/// Write the rendered summary to disk.
pub fn write_report(path: &Path, summary: &RunSummary) -> Result<(), CheckError> {
    std::fs::write(path, render(summary)).map_err(|source| CheckError::ReportWrite {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::compare::Outcome;
    use crate::runner::QueryResult;

    fn sample_summary() -> RunSummary {
        let mut case = TestResult {
            case: "order".to_string(),
            ..TestResult::default()
        };
        case.results.push(QueryResult {
            statement_id: 1,
            sql: "SELECT count(*) FROM t".to_string(),
            outcome: Outcome::Mismatch,
            diff_detail: Some("row 1:\n  ref | 2\n  cand | 3\n".to_string()),
            engine_errors: BTreeMap::new(),
            duration: Duration::from_millis(120),
        });
        case.total = 1;
        case.failed = 1;
        RunSummary {
            cases: vec![case],
            elapsed: Duration::from_secs(2),
        }
    }

    #[test]
    fn report_lists_statement_outcomes_and_totals() {
        let text = render(&sample_summary());
        assert!(text.contains("=== case order ==="));
        assert!(text.contains("MISMATCH"));
        assert!(text.contains("SELECT count(*) FROM t"));
        assert!(text.contains("1 failed"));
    }

    #[test]
    fn report_round_trips_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query_results.txt");
        write_report(&path, &sample_summary()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("=== case order ==="));
    }

    #[test]
    fn skipped_cases_render_without_results() {
        let summary = RunSummary {
            cases: vec![TestResult {
                case: "big".to_string(),
                skipped: true,
                ..TestResult::default()
            }],
            elapsed: Duration::ZERO,
        };
        let text = render(&summary);
        assert!(text.contains("skipped"));
    }
}
