//! Thread-safe progress counters and ETA reporting.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;

use crate::compare::Outcome;

/// Completed-case durations kept for the moving-average ETA. A short window
/// stays responsive when workload shape changes across cases.
const ETA_WINDOW: usize = 10;

/// Shared counters for a run. All fields live behind one lock.
#[derive(Default)]
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tested: usize,
    passed: usize,
    failed: usize,
    unsuitable: usize,
    completed_cases: usize,
    recent_case_durations: VecDeque<Duration>,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub tested: usize,
    pub passed: usize,
    pub failed: usize,
    pub unsuitable: usize,
    pub completed_cases: usize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one statement outcome.
    pub fn record(&self, outcome: Outcome) {
        let mut inner = self.inner.lock();
        inner.tested += 1;
        if outcome.is_pass() {
            inner.passed += 1;
        } else if outcome.is_fail() {
            inner.failed += 1;
        } else {
            inner.unsuitable += 1;
        }
    }

    /// Record that a whole case finished, feeding the ETA window.
    pub fn case_completed(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.completed_cases += 1;
        if inner.recent_case_durations.len() == ETA_WINDOW {
            inner.recent_case_durations.pop_front();
        }
        inner.recent_case_durations.push_back(duration);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.lock();
        ProgressSnapshot {
            tested: inner.tested,
            passed: inner.passed,
            failed: inner.failed,
            unsuitable: inner.unsuitable,
            completed_cases: inner.completed_cases,
        }
    }

    /// Estimated time to finish `remaining_cases`, from the moving average of
    /// recently completed cases. `None` until at least one case finished.
    pub fn eta(&self, remaining_cases: usize) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.recent_case_durations.is_empty() {
            return None;
        }
        let total: Duration = inner.recent_case_durations.iter().sum();
        let average = total / inner.recent_case_durations.len() as u32;
        Some(average * remaining_cases as u32)
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tested {} | passed {} | failed {} | unsuitable {}",
            self.tested, self.passed, self.failed, self.unsuitable
        )
    }
}

/// Render a duration the way a human wants to read an ETA.
pub fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
