//! Concurrent case orchestration.
//!
//! A case walks `Setup → Action → Check → Done`. Setup and Action statements
//! are grouped by their leading verb and run group-by-group: groups are
//! strictly sequential (DDL before the data that depends on it), statements
//! inside a group run on a bounded worker pool. Check statements run on both
//! engines, and the comparison outcome is folded into a [`TestResult`].
//!
//! Shutdown is cooperative: a shared flag is consulted between statements and
//! between groups, in-flight work is allowed to finish, and nothing new
//! starts once the flag is set.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::compare::{compare, Outcome};
use crate::context::{resolve_contexts, ExecutionContext};
use crate::engine::{Engine, ExecutionOutcome};
use crate::error::CheckError;
use crate::progress::ProgressTracker;
use crate::statement::Statement;

/// Default width of the per-group worker pool.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Scripts for the two engines under test. Setup/Action scripts are
/// per-engine (dialects differ); the Check script is shared.
#[derive(Debug, Clone, Default)]
pub struct EnginePair<T> {
    pub reference: T,
    pub candidate: T,
}

/// A named test suite: setup + action + check scripts, executed and reported
/// as one unit.
#[derive(Debug, Clone, Default)]
pub struct Case {
    pub name: String,
    pub setup: EnginePair<Vec<Statement>>,
    pub action: EnginePair<Vec<Statement>>,
    pub check: Vec<Statement>,
}

impl Case {
    pub fn named(name: impl Into<String>) -> Self {
        Case {
            name: name.into(),
            ..Case::default()
        }
    }
}

/// Outcome of one check statement. Created by the comparator, never mutated
/// afterward.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub statement_id: usize,
    pub sql: String,
    pub outcome: Outcome,
    pub diff_detail: Option<String>,
    /// Per-engine execution error messages, keyed by engine name.
    pub engine_errors: BTreeMap<String, String>,
    pub duration: Duration,
}

/// Aggregated results for one case.
#[derive(Debug, Clone, Default)]
pub struct TestResult {
    pub case: String,
    pub results: Vec<QueryResult>,
    pub passed: usize,
    pub failed: usize,
    pub unsuitable: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// The case was on the skip-list and never ran.
    pub skipped: bool,
    /// The setup phase failed and the case stopped early.
    pub aborted: Option<String>,
}

impl TestResult {
    fn named(case: &str) -> Self {
        TestResult {
            case: case.to_string(),
            ..TestResult::default()
        }
    }

    fn record(&mut self, result: QueryResult) {
        self.total += 1;
        if result.outcome.is_pass() {
            self.passed += 1;
        } else if result.outcome.is_fail() {
            self.failed += 1;
        } else {
            self.unsuitable += 1;
        }
        debug_assert!(self.passed + self.failed <= self.total);
        self.results.push(result);
    }

    /// Whether this case should fail the run.
    pub fn is_failed(&self) -> bool {
        self.failed > 0 || self.aborted.is_some()
    }
}

/// Results for a whole run, in case order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub cases: Vec<TestResult>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn failed_cases(&self) -> usize {
        self.cases.iter().filter(|c| c.is_failed()).count()
    }

    /// Drives the process exit code: the run succeeds iff no case failed.
    pub fn is_success(&self) -> bool {
        self.failed_cases() == 0
    }
}

/// Knobs for a run. Defaults match the reference workflow.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker-pool width inside one statement group.
    pub concurrency: usize,
    /// Skip Setup and Action, run only the Check phase.
    pub check_only: bool,
    /// Case names that transition straight to Done with an empty result.
    pub skip: Vec<String>,
    /// Suspend/resume warehouses before every check statement.
    pub cold_runs: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            concurrency: DEFAULT_CONCURRENCY,
            check_only: false,
            skip: Vec::new(),
            cold_runs: false,
        }
    }
}

enum PhaseMode {
    /// A real statement failure aborts the phase (Setup).
    FatalOnError,
    /// Failures are logged and the group continues (Action).
    Tolerant,
}

/// Drives cases against a reference and a candidate engine.
pub struct Orchestrator {
    reference: Arc<dyn Engine>,
    candidate: Arc<dyn Engine>,
    options: RunOptions,
    pool: rayon::ThreadPool,
    cancel: Arc<AtomicBool>,
    progress: Arc<ProgressTracker>,
}

impl Orchestrator {
    pub fn new(
        reference: Arc<dyn Engine>,
        candidate: Arc<dyn Engine>,
        options: RunOptions,
    ) -> Result<Self, CheckError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.concurrency.max(1))
            .thread_name(|i| format!("crosscheck-worker-{i}"))
            .build()?;
        Ok(Orchestrator {
            reference,
            candidate,
            options,
            pool,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(ProgressTracker::new()),
        })
    }

    /// The cooperative shutdown flag. Set it (e.g. from a signal handler) to
    /// stop the run after in-flight statements finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Run cases sequentially, stopping between cases on cancellation.
    pub fn run(&self, cases: &[Case]) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::default();
        for case in cases {
            if self.cancelled() {
                tracing::info!("shutdown requested, remaining cases skipped");
                break;
            }
            let result = self.run_case(case);
            self.progress.case_completed(result.elapsed);
            summary.cases.push(result);
        }
        summary.elapsed = start.elapsed();
        summary
    }

    /// Run one case through its phase state machine.
    pub fn run_case(&self, case: &Case) -> TestResult {
        if self.options.skip.iter().any(|s| s == &case.name) {
            tracing::info!(case = %case.name, "case is on the skip-list");
            let mut result = TestResult::named(&case.name);
            result.skipped = true;
            return result;
        }

        let start = Instant::now();
        let mut result = TestResult::named(&case.name);

        if !self.options.check_only {
            for (phase, scripts, mode) in [
                ("setup", &case.setup, PhaseMode::FatalOnError),
                ("action", &case.action, PhaseMode::Tolerant),
            ] {
                for (engine, statements) in [
                    (&self.reference, &scripts.reference),
                    (&self.candidate, &scripts.candidate),
                ] {
                    if let Err(err) =
                        self.run_phase(&case.name, phase, engine.as_ref(), statements, &mode)
                    {
                        tracing::error!(case = %case.name, %err, "case aborted");
                        result.aborted = Some(err.to_string());
                        result.elapsed = start.elapsed();
                        return result;
                    }
                }
            }
        }

        for query_result in self.run_check(&case.check) {
            self.progress.record(query_result.outcome);
            result.record(query_result);
        }
        result.elapsed = start.elapsed();
        result
    }

    /// Execute one engine's script for one phase: groups sequential,
    /// statements within a group on the bounded pool.
    fn run_phase(
        &self,
        case: &str,
        phase: &str,
        engine: &dyn Engine,
        statements: &[Statement],
        mode: &PhaseMode,
    ) -> Result<(), CheckError> {
        let resolved = resolve_contexts(statements, &ExecutionContext::default());
        let items: Vec<(&Statement, String, ExecutionContext)> = statements
            .iter()
            .zip(resolved)
            .map(|(statement, (cleaned, context))| (statement, cleaned, context))
            .collect();

        for group in group_runs(&items) {
            if self.cancelled() {
                tracing::info!(case, phase, "shutdown requested, group skipped");
                return Ok(());
            }
            tracing::debug!(
                case,
                phase,
                engine = engine.name(),
                key = %group[0].0.group_key(),
                statements = group.len(),
                "running group"
            );
            let fatal: Mutex<Option<CheckError>> = Mutex::new(None);
            self.pool.install(|| {
                rayon::scope(|scope| {
                    for (statement, cleaned, context) in group {
                        // A bare USE only shifts context; nothing to run.
                        if cleaned.is_empty() {
                            continue;
                        }
                        let fatal = &fatal;
                        let cancel = &self.cancel;
                        scope.spawn(move |_| {
                            if cancel.load(Ordering::Relaxed) {
                                return;
                            }
                            match engine.run(cleaned, context) {
                                ExecutionOutcome::Success(_) => {}
                                ExecutionOutcome::Failure { message, .. } => {
                                    tracing::warn!(
                                        case,
                                        phase,
                                        engine = engine.name(),
                                        statement = statement.id,
                                        %message,
                                        "statement failed"
                                    );
                                    if matches!(mode, PhaseMode::FatalOnError) {
                                        let mut slot = fatal.lock();
                                        if slot.is_none() {
                                            *slot = Some(CheckError::SetupFailed {
                                                case: case.to_string(),
                                                engine: engine.name().to_string(),
                                                sql: statement.preview(),
                                                message,
                                            });
                                        }
                                    }
                                }
                            }
                        });
                    }
                });
            });
            if let Some(err) = fatal.into_inner() {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Check phase: each statement runs on both engines concurrently, the
    /// outputs are compared, and the outcome is recorded in statement order.
    fn run_check(&self, statements: &[Statement]) -> Vec<QueryResult> {
        let resolved = resolve_contexts(statements, &ExecutionContext::default());
        let mut results = Vec::new();

        for (statement, (cleaned, context)) in statements.iter().zip(resolved) {
            if self.cancelled() {
                tracing::info!("shutdown requested, remaining check statements skipped");
                break;
            }
            if cleaned.is_empty() {
                continue;
            }
            if self.options.cold_runs {
                self.reference.prepare(&context);
                self.candidate.prepare(&context);
            }

            let start = Instant::now();
            let (reference_out, candidate_out) = self.pool.install(|| {
                rayon::join(
                    || self.reference.run(&cleaned, &context),
                    || self.candidate.run(&cleaned, &context),
                )
            });
            let duration = start.elapsed();

            results.push(self.judge(statement, cleaned, reference_out, candidate_out, duration));
        }
        results
    }

    /// Turn the two execution outcomes for one statement into a QueryResult.
    /// An execution error on either side short-circuits comparison.
    fn judge(
        &self,
        statement: &Statement,
        cleaned: String,
        reference_out: ExecutionOutcome,
        candidate_out: ExecutionOutcome,
        duration: Duration,
    ) -> QueryResult {
        let mut engine_errors = BTreeMap::new();
        if let ExecutionOutcome::Failure { message, .. } = &reference_out {
            engine_errors.insert(self.reference.name().to_string(), message.clone());
        }
        if let ExecutionOutcome::Failure { message, .. } = &candidate_out {
            engine_errors.insert(self.candidate.name().to_string(), message.clone());
        }

        let (outcome, diff_detail) = match (&reference_out, &candidate_out) {
            (ExecutionOutcome::Success(reference), ExecutionOutcome::Success(candidate)) => {
                let comparison = compare(
                    self.reference.name(),
                    &reference.stdout,
                    self.candidate.name(),
                    &candidate.stdout,
                );
                (comparison.outcome, comparison.detail)
            }
            _ => (Outcome::ExecutionError, None),
        };

        if outcome.is_fail() {
            tracing::warn!(
                statement = statement.id,
                sql = %statement.preview(),
                %outcome,
                "check statement failed"
            );
        } else {
            tracing::debug!(statement = statement.id, %outcome, "check statement done");
        }

        QueryResult {
            statement_id: statement.id,
            sql: cleaned,
            outcome,
            diff_detail,
            engine_errors,
            duration,
        }
    }
}

/// Maximal consecutive runs of items whose statements share one group key.
fn group_runs<'a>(
    items: &'a [(&'a Statement, String, ExecutionContext)],
) -> Vec<&'a [(&'a Statement, String, ExecutionContext)]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for idx in 1..=items.len() {
        let boundary = idx == items.len()
            || items[idx].0.group_key() != items[start].0.group_key();
        if boundary && idx > start {
            groups.push(&items[start..idx]);
            start = idx;
        }
    }
    groups
}
