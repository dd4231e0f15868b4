//! Engine invocation.
//!
//! Each statement runs as one external CLI process against one engine. The
//! [`Engine`] trait is the seam between the orchestrator/comparator and the
//! execution backend, so a native driver could replace the process-per-query
//! model without touching either.
//!
//! Failures never propagate as `Err`: a statement that could not run comes
//! back as [`ExecutionOutcome::Failure`] so batch processing continues.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::ExecutionContext;

/// Captured engine error messages are cut to this length.
const ERROR_MESSAGE_LIMIT: usize = 500;

/// Pause between suspending and resuming a warehouse.
const WAREHOUSE_RESUME_DELAY: Duration = Duration::from_secs(5);

/// Which CLI invocation template an engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// `bendsql`-style: `--query=<sql> -D <db>`, TSV output.
    Bendsql,
    /// `snowsql`-style: `--query <sql> --dbname <db> -o output_format=tsv ...`.
    Snowsql,
}

/// Connection parameters for one engine under test. Supplied by the caller,
/// never mutated by the core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub name: String,
    pub kind: EngineKind,
    /// Executable to invoke; defaults to the conventional binary for `kind`.
    pub program: Option<String>,
    pub database: String,
    pub warehouse: Option<String>,
    /// Per-statement wall-clock limit. Exceeding it is an execution error,
    /// not a crash.
    pub timeout: Option<Duration>,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>, kind: EngineKind, database: impl Into<String>) -> Self {
        EngineConfig {
            name: name.into(),
            kind,
            program: None,
            database: database.into(),
            warehouse: None,
            timeout: None,
        }
    }

    fn program(&self) -> &str {
        self.program.as_deref().unwrap_or(match self.kind {
            EngineKind::Bendsql => "bendsql",
            EngineKind::Snowsql => "snowsql",
        })
    }
}

/// What one process invocation produced. Owned by the invocation, consumed
/// immediately by comparison.
#[derive(Debug, Clone)]
pub struct RawExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub wall_time: Duration,
}

/// Tagged result of running one statement: either captured output or a
/// classified execution error. No sentinel strings.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success(RawExecutionResult),
    Failure {
        message: String,
        wall_time: Duration,
    },
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failure { .. })
    }

    pub fn wall_time(&self) -> Duration {
        match self {
            ExecutionOutcome::Success(raw) => raw.wall_time,
            ExecutionOutcome::Failure { wall_time, .. } => *wall_time,
        }
    }
}

/// An execution backend for one engine.
///
/// Implementations must be callable from multiple worker threads at once.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Run one statement under an explicit context. The sole blocking point
    /// in the system; returns when the engine finishes (or times out).
    fn run(&self, sql: &str, context: &ExecutionContext) -> ExecutionOutcome;

    /// Called before a timed/cold statement when the orchestrator runs with
    /// cold caches. The default does nothing.
    fn prepare(&self, _context: &ExecutionContext) {}
}

/// Per-engine predicate that recognizes an error hiding in captured output
/// even when the process exited zero. Returns the error message when it
/// fires.
pub type ErrorClassifier = Box<dyn Fn(&RawExecutionResult) -> Option<String> + Send + Sync>;

/// Process-per-query engine backend, mirroring how the target CLIs are
/// actually driven.
pub struct CliEngine {
    config: EngineConfig,
    classifier: ErrorClassifier,
}

impl CliEngine {
    pub fn new(config: EngineConfig) -> Self {
        let classifier = default_classifier(config.kind);
        CliEngine { config, classifier }
    }

    /// Replace the output classifier, e.g. to recognize additional error
    /// banners of a custom engine build.
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the argv for one statement. Output-format flags force
    /// tab-separated values with no header row and no timing banner, so the
    /// result body is machine-comparable.
    fn build_command(&self, sql: &str, context: &ExecutionContext) -> Command {
        let database = context
            .database
            .as_deref()
            .unwrap_or(&self.config.database);
        let mut command = Command::new(self.config.program());
        match self.config.kind {
            EngineKind::Bendsql => {
                command
                    .arg(format!("--query={sql}"))
                    .arg("-D")
                    .arg(database)
                    .arg("--output")
                    .arg("tsv")
                    .arg("--quote-style")
                    .arg("never");
            }
            EngineKind::Snowsql => {
                command
                    .arg("--query")
                    .arg(sql)
                    .arg("--dbname")
                    .arg(database)
                    .arg("--schemaname")
                    .arg(context.schema.as_deref().unwrap_or("PUBLIC"))
                    .args(["-o", "output_format=tsv"])
                    .args(["-o", "header=false"])
                    .args(["-o", "timing=false"])
                    .args(["-o", "friendly=false"]);
                if let Some(warehouse) = &self.config.warehouse {
                    command.arg("--warehouse").arg(warehouse);
                }
            }
        }
        command
    }

    /// Suspend and resume the configured warehouse so the next statement runs
    /// against cold caches.
    pub fn restart_warehouse(&self, context: &ExecutionContext) -> ExecutionOutcome {
        let Some(warehouse) = self.config.warehouse.clone() else {
            return ExecutionOutcome::Failure {
                message: format!("engine `{}` has no warehouse configured", self.config.name),
                wall_time: Duration::ZERO,
            };
        };
        tracing::info!(engine = %self.config.name, %warehouse, "suspending warehouse");
        let suspend = self.run(&format!("ALTER WAREHOUSE {warehouse} SUSPEND"), context);
        if suspend.is_failure() {
            return suspend;
        }
        thread::sleep(WAREHOUSE_RESUME_DELAY);
        // A trivial query is enough to wake the warehouse back up.
        self.run("SELECT 1", context)
    }
}

impl Engine for CliEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn prepare(&self, context: &ExecutionContext) {
        if self.config.warehouse.is_some() {
            if let ExecutionOutcome::Failure { message, .. } = self.restart_warehouse(context) {
                tracing::warn!(engine = %self.config.name, %message, "warehouse restart failed");
            }
        }
    }

    fn run(&self, sql: &str, context: &ExecutionContext) -> ExecutionOutcome {
        let mut command = self.build_command(sql, context);
        tracing::debug!(engine = %self.config.name, sql = %crate::statement::preview(sql, 100), "executing");

        let raw = match execute_command(&mut command, self.config.timeout) {
            Ok(raw) => raw,
            Err(err) => {
                return ExecutionOutcome::Failure {
                    message: truncate_message(&format!(
                        "failed to launch `{}`: {err}",
                        self.config.program()
                    )),
                    wall_time: Duration::ZERO,
                }
            }
        };

        if let Some(message) = classify(&raw, sql, &self.classifier) {
            tracing::warn!(engine = %self.config.name, %message, "statement failed");
            return ExecutionOutcome::Failure {
                message,
                wall_time: raw.wall_time,
            };
        }
        ExecutionOutcome::Success(raw)
    }
}

/// The built-in output classifier for an engine kind.
pub fn default_classifier(kind: EngineKind) -> ErrorClassifier {
    match kind {
        // bendsql can exit zero while printing an API error banner.
        EngineKind::Bendsql => Box::new(|raw: &RawExecutionResult| {
            if raw.stderr.contains("APIError: ResponseError") {
                Some(truncate_message(&raw.stderr))
            } else {
                None
            }
        }),
        EngineKind::Snowsql => Box::new(|raw: &RawExecutionResult| {
            // snowsql reports SQL errors on stdout with a numeric error code.
            if raw.stdout.contains("SQL compilation error")
                || raw.stdout.contains("SQL execution error")
            {
                Some(truncate_message(&raw.stdout))
            } else {
                None
            }
        }),
    }
}

/// Classify a finished invocation: non-zero exit or a classifier hit is an
/// execution error, except for the idempotent-setup special case.
fn classify(
    raw: &RawExecutionResult,
    sql: &str,
    classifier: &ErrorClassifier,
) -> Option<String> {
    let message = if let Some(message) = classifier(raw) {
        Some(message)
    } else if raw.exit_code != 0 {
        let detail = if raw.stderr.trim().is_empty() {
            &raw.stdout
        } else {
            &raw.stderr
        };
        Some(truncate_message(&format!(
            "exit code {}: {}",
            raw.exit_code,
            detail.trim()
        )))
    } else {
        None
    };

    // `DROP ... IF EXISTS` that failed only because the object is already
    // gone counts as success.
    match message {
        Some(message) if is_benign_missing_object(sql, &message) => {
            tracing::debug!(%message, "ignoring missing-object error for idempotent drop");
            None
        }
        other => other,
    }
}

/// A `DROP ... IF EXISTS` whose only error is "object does not exist" must
/// not block setup.
pub fn is_benign_missing_object(sql: &str, message: &str) -> bool {
    let sql = sql.trim_start();
    let is_idempotent_drop = sql
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("drop"))
        && sql.to_ascii_lowercase().contains("if exists");
    if !is_idempotent_drop {
        return false;
    }
    let lower = message.to_ascii_lowercase();
    lower.contains("does not exist") || lower.contains("unknown database") || lower.contains("not found")
}

/// Recreate the working database on an engine: `DROP DATABASE IF EXISTS`
/// followed by `CREATE DATABASE`. A failure here is fatal infrastructure,
/// not a per-statement error.
pub fn setup_database(engine: &dyn Engine, database: &str) -> Result<(), crate::error::CheckError> {
    let context = ExecutionContext::default();
    for sql in [
        format!("DROP DATABASE IF EXISTS {database}"),
        format!("CREATE DATABASE {database}"),
    ] {
        if let ExecutionOutcome::Failure { message, .. } = engine.run(&sql, &context) {
            return Err(crate::error::CheckError::DatabaseSetup {
                engine: engine.name().to_string(),
                database: database.to_string(),
                message,
            });
        }
    }
    tracing::info!(engine = engine.name(), database, "database recreated");
    Ok(())
}

/// Run a prepared command synchronously, capturing stdout/stderr and wall
/// time. With a timeout, the child is polled and killed on expiry; the kill
/// is reported through a synthetic non-zero exit code.
pub fn execute_command(
    command: &mut Command,
    timeout: Option<Duration>,
) -> std::io::Result<RawExecutionResult> {
    let start = Instant::now();
    match timeout {
        None => {
            let output = command.output()?;
            Ok(RawExecutionResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                wall_time: start.elapsed(),
            })
        }
        Some(limit) => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
            let mut child = command.spawn()?;
            let stdout = drain(child.stdout.take());
            let stderr = drain(child.stderr.take());
            let status = wait_with_deadline(&mut child, start + limit)?;
            let stdout = stdout.join().unwrap_or_default();
            let stderr = stderr.join().unwrap_or_default();
            match status {
                Some(status) => Ok(RawExecutionResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                    wall_time: start.elapsed(),
                }),
                None => Ok(RawExecutionResult {
                    exit_code: -1,
                    stdout,
                    stderr: format!("statement timed out after {}s", limit.as_secs()),
                    wall_time: start.elapsed(),
                }),
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_string(&mut buffer);
        }
        buffer
    })
}

/// Poll until exit or deadline. `None` means the deadline passed and the
/// child was killed.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn truncate_message(message: &str) -> String {
    let message = message.trim();
    if message.chars().count() <= ERROR_MESSAGE_LIMIT {
        return message.to_string();
    }
    let cut: String = message.chars().take(ERROR_MESSAGE_LIMIT).collect();
    format!("{cut}... (truncated)")
}
