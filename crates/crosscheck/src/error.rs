//! Error types for the compatibility checker.
//!
//! Two taxonomies are kept strictly apart:
//!
//! - [`CheckError`] covers infrastructure failures (unreadable scripts, a
//!   setup phase that cannot complete). These abort a *case*, never the run.
//! - Per-statement engine failures are not errors at all from the library's
//!   point of view: they are recorded as [`Outcome::ExecutionError`] in the
//!   aggregated results and the batch continues.
//!
//! [`Outcome::ExecutionError`]: crate::compare::Outcome::ExecutionError

use std::path::PathBuf;

/// The error type for checker infrastructure failures.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CheckError {
    #[error("failed to read script {path}: {source}")]
    ScriptRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("setup phase failed for case `{case}` on engine `{engine}`:\n[SQL] {sql}\n{message}")]
    SetupFailed {
        case: String,
        engine: String,
        sql: String,
        message: String,
    },

    #[error("failed to create working database `{database}` on engine `{engine}`: {message}")]
    DatabaseSetup {
        engine: String,
        database: String,
        message: String,
    },

    #[error("failed to write report {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
