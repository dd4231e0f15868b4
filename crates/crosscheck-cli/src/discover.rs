//! SQL case discovery.
//!
//! Cases live under the SQL directory, one subdirectory per case:
//!
//! ```text
//! sql/
//!   order/
//!     check.sql             # shared comparison queries (required)
//!     setup.sql             # shared setup, used by both engines, or
//!     databend/setup.sql    # per-engine setup (named after the engine)
//!     databend/action.sql
//!     snowflake/setup.sql
//! ```
//!
//! Per-engine scripts win over the shared ones; a missing script means an
//! empty phase.

use std::path::Path;

use anyhow::Context;

use crosscheck::runner::{Case, EnginePair};
use crosscheck::statement::{load_script_file, Statement};

/// Discover every case directory under `sql_dir` (identified by a
/// `check.sql`), sorted by name.
pub fn discover_cases(
    sql_dir: &Path,
    reference_engine: &str,
    candidate_engine: &str,
) -> anyhow::Result<Vec<Case>> {
    let pattern = sql_dir.join("*").join("check.sql");
    let pattern = pattern
        .to_str()
        .context("SQL directory path is not valid UTF-8")?;

    let mut cases = Vec::new();
    for entry in glob::glob(pattern).context("invalid SQL directory pattern")? {
        let check_path = entry.context("failed to read SQL directory")?;
        let case_dir = check_path
            .parent()
            .context("check.sql has no parent directory")?
            .to_path_buf();
        cases.push(load_case(&case_dir, reference_engine, candidate_engine)?);
    }
    cases.sort_by(|a, b| a.name.cmp(&b.name));
    anyhow::ensure!(
        !cases.is_empty(),
        "no cases found under {} (expected <case>/check.sql)",
        sql_dir.display()
    );
    Ok(cases)
}

/// Load one case directory.
pub fn load_case(
    case_dir: &Path,
    reference_engine: &str,
    candidate_engine: &str,
) -> anyhow::Result<Case> {
    let name = case_dir
        .file_name()
        .context("case directory has no name")?
        .to_string_lossy()
        .into_owned();

    let mut case = Case::named(&name);
    case.setup = load_phase(case_dir, "setup.sql", reference_engine, candidate_engine)?;
    case.action = load_phase(case_dir, "action.sql", reference_engine, candidate_engine)?;
    case.check = load_script_file(&case_dir.join("check.sql"))?;
    Ok(case)
}

fn load_phase(
    case_dir: &Path,
    file_name: &str,
    reference_engine: &str,
    candidate_engine: &str,
) -> anyhow::Result<EnginePair<Vec<Statement>>> {
    Ok(EnginePair {
        reference: load_engine_script(case_dir, reference_engine, file_name)?,
        candidate: load_engine_script(case_dir, candidate_engine, file_name)?,
    })
}

fn load_engine_script(
    case_dir: &Path,
    engine: &str,
    file_name: &str,
) -> anyhow::Result<Vec<Statement>> {
    let per_engine = case_dir.join(engine).join(file_name);
    let shared = case_dir.join(file_name);
    for path in [per_engine, shared] {
        if path.exists() {
            return Ok(load_script_file(&path)?);
        }
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, text: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn discovers_cases_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("zeta/check.sql"), "SELECT 1;");
        write(&dir.path().join("alpha/check.sql"), "SELECT 2;");

        let cases = discover_cases(dir.path(), "snow", "bend").unwrap();
        let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn per_engine_scripts_win_over_shared_ones() {
        let dir = tempfile::tempdir().unwrap();
        let case = dir.path().join("order");
        write(&case.join("check.sql"), "SELECT count(*) FROM t;");
        write(&case.join("setup.sql"), "CREATE TABLE shared (id INT);");
        write(&case.join("bend/setup.sql"), "CREATE TABLE bend_only (id INT);");

        let loaded = load_case(&case, "snow", "bend").unwrap();
        assert!(loaded.setup.reference[0].sql.contains("shared"));
        assert!(loaded.setup.candidate[0].sql.contains("bend_only"));
    }

    #[test]
    fn missing_phase_scripts_mean_empty_phases() {
        let dir = tempfile::tempdir().unwrap();
        let case = dir.path().join("bare");
        write(&case.join("check.sql"), "SELECT 1;");

        let loaded = load_case(&case, "snow", "bend").unwrap();
        assert!(loaded.setup.reference.is_empty());
        assert!(loaded.action.candidate.is_empty());
        assert_eq!(loaded.check.len(), 1);
    }

    #[test]
    fn empty_sql_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_cases(dir.path(), "snow", "bend").is_err());
    }
}
