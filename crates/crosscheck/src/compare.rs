//! Tiered result comparison.
//!
//! Two captured outputs are judged equivalent at the strongest tier that
//! holds: byte-identical, identical after normalization, or identical after
//! normalization and sorting (multiset equality, so duplicate rows with
//! different multiplicities still mismatch). Anything weaker is a mismatch
//! and produces bounded diff detail.

use std::fmt;

use itertools::Itertools;
use similar::{ChangeTag, TextDiff};

use crate::normalize::normalize_line;

/// Detailed row-by-row comparison stops after this many rows.
const DIFF_ROW_WINDOW: usize = 100;

/// The comparison outcome for one statement. Exactly one per statement per
/// run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Raw outputs were byte-identical.
    ExactMatch,
    /// Outputs agreed after normalization, in original row order.
    NormalizedMatch,
    /// Outputs agreed after normalization and sorting.
    OrderAgnosticMatch,
    /// Outputs disagree on real data.
    Mismatch,
    /// At least one engine failed to execute the statement.
    ExecutionError,
    /// Both result sets were empty: no comparable signal.
    Unsuitable,
}

impl Outcome {
    /// Whether the outcome counts toward `passed`.
    ///
    /// `Unsuitable` is deliberately neither passed nor failed: it is tallied
    /// separately so dashboards can tell "agreed on real data" from "agreed
    /// on nothing".
    pub fn is_pass(self) -> bool {
        matches!(
            self,
            Outcome::ExactMatch | Outcome::NormalizedMatch | Outcome::OrderAgnosticMatch
        )
    }

    pub fn is_fail(self) -> bool {
        matches!(self, Outcome::Mismatch | Outcome::ExecutionError)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::ExactMatch => "exact match",
            Outcome::NormalizedMatch => "normalized match",
            Outcome::OrderAgnosticMatch => "order-agnostic match",
            Outcome::Mismatch => "MISMATCH",
            Outcome::ExecutionError => "EXECUTION ERROR",
            Outcome::Unsuitable => "unsuitable",
        };
        f.write_str(label)
    }
}

/// Outcome plus human-readable diff detail for mismatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub outcome: Outcome,
    pub detail: Option<String>,
}

impl Comparison {
    fn of(outcome: Outcome) -> Self {
        Comparison {
            outcome,
            detail: None,
        }
    }
}

/// Compare two engines' raw outputs for one statement.
///
/// Lines are split first, blank lines dropped, then each line normalized
/// individually. Tiers are evaluated in strict order; the first that holds
/// wins.
pub fn compare(name_a: &str, raw_a: &str, name_b: &str, raw_b: &str) -> Comparison {
    let lines_a: Vec<&str> = raw_a.lines().filter(|l| !l.trim().is_empty()).collect();
    let lines_b: Vec<&str> = raw_b.lines().filter(|l| !l.trim().is_empty()).collect();

    match (lines_a.is_empty(), lines_b.is_empty()) {
        (true, true) => return Comparison::of(Outcome::Unsuitable),
        (true, false) => {
            return Comparison {
                outcome: Outcome::Mismatch,
                detail: Some(format!("Unsuitable: {name_a} returned empty result set")),
            }
        }
        (false, true) => {
            return Comparison {
                outcome: Outcome::Mismatch,
                detail: Some(format!("Unsuitable: {name_b} returned empty result set")),
            }
        }
        (false, false) => {}
    }

    if raw_a == raw_b {
        return Comparison::of(Outcome::ExactMatch);
    }

    let normalized_a: Vec<String> = lines_a.iter().map(|l| normalize_line(l)).collect();
    let normalized_b: Vec<String> = lines_b.iter().map(|l| normalize_line(l)).collect();

    if normalized_a == normalized_b {
        return Comparison::of(Outcome::NormalizedMatch);
    }

    let mut sorted_a = normalized_a;
    let mut sorted_b = normalized_b;
    sorted_a.sort_unstable();
    sorted_b.sort_unstable();

    if sorted_a == sorted_b {
        return Comparison::of(Outcome::OrderAgnosticMatch);
    }

    Comparison {
        outcome: Outcome::Mismatch,
        detail: Some(mismatch_detail(name_a, &sorted_a, name_b, &sorted_b)),
    }
}

/// Build bounded, column-aware diff detail over sorted normalized rows.
fn mismatch_detail(name_a: &str, rows_a: &[String], name_b: &str, rows_b: &[String]) -> String {
    fn column<'a>(cols: &[&'a str], i: usize) -> &'a str {
        cols.get(i).copied().unwrap_or("")
    }

    let mut detail = String::new();
    let compared = rows_a.len().min(rows_b.len());
    let window = compared.min(DIFF_ROW_WINDOW);

    for idx in 0..window {
        let cols_a: Vec<&str> = rows_a[idx].split('\t').collect();
        let cols_b: Vec<&str> = rows_b[idx].split('\t').collect();
        if cols_a == cols_b {
            continue;
        }
        // Pad the shorter row so per-column comparison never indexes out of
        // range.
        let width = cols_a.len().max(cols_b.len());
        let differing: Vec<usize> = (0..width)
            .filter(|&i| column(&cols_a, i) != column(&cols_b, i))
            .collect();
        detail.push_str(&format!(
            "row {}:\n  {:>10} | {}\n  {:>10} | {}\n  differing columns: {}\n",
            idx + 1,
            name_a,
            (0..width).map(|i| column(&cols_a, i)).join(" | "),
            name_b,
            (0..width).map(|i| column(&cols_b, i)).join(" | "),
            differing.iter().map(|i| i + 1).join(", "),
        ));
    }

    if compared > DIFF_ROW_WINDOW {
        detail.push_str(&format!(
            "(diff truncated: only the first {DIFF_ROW_WINDOW} of {compared} rows were compared in detail)\n"
        ));
    }

    if rows_a.len() != rows_b.len() {
        detail.push_str(&format!(
            "row count differs: {name_a} returned {} rows, {name_b} returned {} rows\n",
            rows_a.len(),
            rows_b.len(),
        ));
    }

    detail.push_str(&format!("[Diff] (-{name_a}|+{name_b})\n"));
    let joined_a = rows_a.iter().take(DIFF_ROW_WINDOW).join("\n");
    let joined_b = rows_b.iter().take(DIFF_ROW_WINDOW).join("\n");
    let diff = TextDiff::from_lines(joined_a.as_str(), joined_b.as_str());
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-   ",
            ChangeTag::Insert => "+   ",
            ChangeTag::Equal => "    ",
        };
        detail.push_str(sign);
        detail.push_str(change.value().trim_end_matches('\n'));
        detail.push('\n');
    }
    detail
}
