//! End-to-end orchestrator scenarios against a scripted in-process engine.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crosscheck::engine::{Engine, ExecutionOutcome, RawExecutionResult};
use crosscheck::runner::{Case, EnginePair, Orchestrator, RunOptions};
use crosscheck::statement::split_script;
use crosscheck::{ExecutionContext, Outcome};

type Responder = Box<dyn Fn(&str) -> ExecutionOutcome + Send + Sync>;

/// An engine whose behavior is a closure over the statement text. Records
/// every statement it executes.
struct ScriptedEngine {
    name: String,
    respond: Responder,
    log: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    fn new(name: &str, respond: impl Fn(&str) -> ExecutionOutcome + Send + Sync + 'static) -> Self {
        ScriptedEngine {
            name: name.to_string(),
            respond: Box::new(respond),
            log: Mutex::new(Vec::new()),
        }
    }

    fn executed(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, sql: &str, _context: &ExecutionContext) -> ExecutionOutcome {
        self.log.lock().push(sql.to_string());
        (self.respond)(sql)
    }
}

fn ok(stdout: &str) -> ExecutionOutcome {
    ExecutionOutcome::Success(RawExecutionResult {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
        wall_time: Duration::from_millis(1),
    })
}

fn fail(message: &str) -> ExecutionOutcome {
    ExecutionOutcome::Failure {
        message: message.to_string(),
        wall_time: Duration::from_millis(1),
    }
}

fn check_case(sql: &str) -> Case {
    Case {
        name: "case".to_string(),
        check: split_script(sql, "check.sql"),
        ..Case::default()
    }
}

fn orchestrator(
    reference: Arc<ScriptedEngine>,
    candidate: Arc<ScriptedEngine>,
    options: RunOptions,
) -> Orchestrator {
    Orchestrator::new(reference, candidate, options).unwrap()
}

#[test]
fn identical_scalar_results_are_an_exact_match() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("1\n")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n")));
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let summary = orch.run(&[check_case("SELECT 1;")]);
    let case = &summary.cases[0];
    assert_eq!(case.results[0].outcome, Outcome::ExactMatch);
    assert_eq!(case.passed, 1);
    assert!(summary.is_success());
}

#[test]
fn trailing_zero_difference_is_a_normalized_match() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("2.0\n")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("2\n")));
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let summary = orch.run(&[check_case("SELECT avg(x) FROM t;")]);
    assert_eq!(summary.cases[0].results[0].outcome, Outcome::NormalizedMatch);
}

#[test]
fn row_order_difference_is_an_order_agnostic_match() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("1\n2\n")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("2\n1\n")));
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let summary = orch.run(&[check_case("SELECT x FROM t;")]);
    assert_eq!(
        summary.cases[0].results[0].outcome,
        Outcome::OrderAgnosticMatch
    );
}

#[test]
fn duplicate_multiplicity_difference_is_a_mismatch_with_row_count_note() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("1\n2\n2\n")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n2\n")));
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let summary = orch.run(&[check_case("SELECT x FROM t;")]);
    let result = &summary.cases[0].results[0];
    assert_eq!(result.outcome, Outcome::Mismatch);
    let detail = result.diff_detail.as_deref().unwrap();
    assert!(detail.contains("row count differs"), "{detail}");
    assert!(!summary.is_success());
}

#[test]
fn execution_error_is_recorded_per_engine_and_the_case_continues() {
    let reference = Arc::new(ScriptedEngine::new("ref", |sql| {
        if sql.contains("boom") {
            fail("exit code 1: table not found")
        } else {
            ok("1\n")
        }
    }));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n")));
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let summary = orch.run(&[check_case("SELECT boom; SELECT 1;")]);
    let case = &summary.cases[0];
    assert_eq!(case.results.len(), 2);

    let errored = &case.results[0];
    assert_eq!(errored.outcome, Outcome::ExecutionError);
    assert!(errored.engine_errors.contains_key("ref"));
    assert!(!errored.engine_errors.contains_key("cand"));
    assert!(errored.diff_detail.is_none());

    assert_eq!(case.results[1].outcome, Outcome::ExactMatch);
    assert_eq!(case.failed, 1);
    assert_eq!(case.passed, 1);
}

#[test]
fn empty_results_on_both_sides_are_unsuitable_not_passed() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("")));
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let summary = orch.run(&[check_case("SELECT x FROM empty_table;")]);
    let case = &summary.cases[0];
    assert_eq!(case.results[0].outcome, Outcome::Unsuitable);
    assert_eq!(case.passed, 0);
    assert_eq!(case.failed, 0);
    assert_eq!(case.unsuitable, 1);
    // Unsuitable does not fail the run.
    assert!(summary.is_success());
}

#[test]
fn setup_failure_aborts_the_case_but_not_the_run() {
    let reference = Arc::new(ScriptedEngine::new("ref", |sql| {
        if sql.starts_with("CREATE TABLE broken") {
            fail("exit code 1: no permission")
        } else {
            ok("1\n")
        }
    }));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n")));
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let mut failing = Case::named("failing");
    failing.setup = EnginePair {
        reference: split_script("CREATE TABLE broken (id INT);", "setup.sql"),
        candidate: Vec::new(),
    };
    failing.check = split_script("SELECT 1;", "check.sql");

    let healthy = check_case("SELECT 1;");

    let summary = orch.run(&[failing, healthy]);
    assert_eq!(summary.cases.len(), 2);

    let aborted = &summary.cases[0];
    assert!(aborted.aborted.is_some());
    assert!(aborted.results.is_empty(), "check phase must not run");
    assert!(aborted.is_failed());

    let healthy = &summary.cases[1];
    assert_eq!(healthy.passed, 1);
    assert!(!summary.is_success());
}

#[test]
fn action_failures_are_tolerated_and_the_batch_continues() {
    let reference = Arc::new(ScriptedEngine::new("ref", |sql| {
        if sql.contains("bad_insert") {
            fail("exit code 1: constraint violation")
        } else {
            ok("")
        }
    }));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("")));
    let reference_view = Arc::clone(&reference);
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let mut case = Case::named("tolerant");
    case.action = EnginePair {
        reference: split_script(
            "INSERT INTO t VALUES ('bad_insert'); INSERT INTO t VALUES ('fine');",
            "action.sql",
        ),
        candidate: Vec::new(),
    };

    let summary = orch.run(&[case]);
    assert!(summary.cases[0].aborted.is_none());
    // Both inserts were attempted despite the first one failing.
    assert_eq!(reference_view.executed().len(), 2);
}

#[test]
fn groups_run_sequentially_in_script_order() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("")));
    let reference_view = Arc::clone(&reference);
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let mut case = Case::named("ordering");
    case.action = EnginePair {
        reference: split_script(
            "INSERT INTO a VALUES (1); INSERT INTO b VALUES (2); INSERT INTO c VALUES (3); \
             SELECT count(*) FROM a; INSERT INTO d VALUES (4);",
            "action.sql",
        ),
        candidate: Vec::new(),
    };
    orch.run(&[case]);

    let log = reference_view.executed();
    assert_eq!(log.len(), 5);
    let position = |needle: &str| log.iter().position(|s| s.contains(needle)).unwrap();
    // The INSERT group finishes before the SELECT group starts, which
    // finishes before the trailing INSERT group.
    for insert in ["INTO a", "INTO b", "INTO c"] {
        assert!(position(insert) < position("count(*)"), "log: {log:?}");
    }
    assert!(position("count(*)") < position("INTO d"), "log: {log:?}");
}

#[test]
fn check_only_mode_skips_setup_and_action() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("1\n")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n")));
    let reference_view = Arc::clone(&reference);
    let options = RunOptions {
        check_only: true,
        ..RunOptions::default()
    };
    let orch = orchestrator(reference, candidate, options);

    let mut case = Case::named("co");
    case.setup = EnginePair {
        reference: split_script("CREATE TABLE t (id INT);", "setup.sql"),
        candidate: split_script("CREATE TABLE t (id INT);", "setup.sql"),
    };
    case.check = split_script("SELECT 1;", "check.sql");

    let summary = orch.run(&[case]);
    assert_eq!(summary.cases[0].passed, 1);
    assert_eq!(reference_view.executed(), vec!["SELECT 1".to_string()]);
}

#[test]
fn skip_listed_cases_go_straight_to_done() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("1\n")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n")));
    let reference_view = Arc::clone(&reference);
    let options = RunOptions {
        skip: vec!["slow_case".to_string()],
        ..RunOptions::default()
    };
    let orch = orchestrator(reference, candidate, options);

    let summary = orch.run(&[check_case("SELECT 1;"), {
        let mut c = check_case("SELECT 2;");
        c.name = "slow_case".to_string();
        c
    }]);

    assert!(!summary.cases[0].skipped);
    assert!(summary.cases[1].skipped);
    assert_eq!(summary.cases[1].total, 0);
    assert_eq!(reference_view.executed(), vec!["SELECT 1".to_string()]);
}

#[test]
fn cancellation_stops_new_work_between_statements() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("1\n")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n")));
    let reference_view = Arc::clone(&reference);
    let orch = orchestrator(reference, candidate, RunOptions::default());

    orch.cancel_flag().store(true, Ordering::Relaxed);
    let summary = orch.run(&[check_case("SELECT 1; SELECT 2;")]);

    assert!(summary.cases.is_empty());
    assert!(reference_view.executed().is_empty());
}

#[test]
fn use_directives_thread_context_without_reaching_the_engine() {
    let reference = Arc::new(ScriptedEngine::new("ref", |_| ok("1\n")));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n")));
    let reference_view = Arc::clone(&reference);
    let orch = orchestrator(reference, candidate, RunOptions::default());

    let summary = orch.run(&[check_case("USE analytics; SELECT 1;")]);
    // The bare USE is context-only: one comparable statement remains.
    assert_eq!(summary.cases[0].total, 1);
    assert_eq!(reference_view.executed(), vec!["SELECT 1".to_string()]);
}

#[test]
fn database_setup_is_fatal_only_on_real_failures() {
    let healthy = ScriptedEngine::new("ref", |_| ok(""));
    assert!(crosscheck::engine::setup_database(&healthy, "testdb").is_ok());
    assert_eq!(
        healthy.executed(),
        vec![
            "DROP DATABASE IF EXISTS testdb".to_string(),
            "CREATE DATABASE testdb".to_string(),
        ]
    );

    let broken = ScriptedEngine::new("ref", |sql| {
        if sql.starts_with("CREATE DATABASE") {
            fail("exit code 1: quota exceeded")
        } else {
            ok("")
        }
    });
    let err = crosscheck::engine::setup_database(&broken, "testdb").unwrap_err();
    assert!(err.to_string().contains("testdb"));
    assert!(err.to_string().contains("quota exceeded"));
}

#[test]
fn progress_tracker_observes_check_outcomes() {
    let reference = Arc::new(ScriptedEngine::new("ref", |sql| {
        if sql.contains('9') {
            ok("9\n")
        } else {
            ok("1\n")
        }
    }));
    let candidate = Arc::new(ScriptedEngine::new("cand", |_| ok("1\n")));
    let orch = orchestrator(reference, candidate, RunOptions::default());
    let progress = orch.progress();

    orch.run(&[check_case("SELECT 1; SELECT 9;")]);
    let snapshot = progress.snapshot();
    assert_eq!(snapshot.tested, 2);
    assert_eq!(snapshot.passed, 1);
    assert_eq!(snapshot.failed, 1);
}
