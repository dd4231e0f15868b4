//! Explicit execution context.
//!
//! The currently selected database is *not* shared mutable state. Each
//! statement carries the context it should run under, and a statement that
//! embeds a `USE` directive produces a new context value for the statements
//! after it. Context resolution happens sequentially, in script order, before
//! any statement is dispatched to a worker, so concurrent execution never
//! races on a "current database" field.

use std::sync::OnceLock;

use regex::Regex;

/// The database/schema a statement runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl ExecutionContext {
    pub fn with_database(database: impl Into<String>) -> Self {
        ExecutionContext {
            database: Some(database.into()),
            schema: None,
        }
    }

    /// Apply a statement to this context.
    ///
    /// Extracts embedded `USE <db>` directives (the last one wins), returning
    /// the context subsequent statements should run under together with the
    /// statement text stripped of the directives. The returned SQL may be
    /// empty when the statement was a bare `USE`.
    pub fn apply(&self, sql: &str) -> (ExecutionContext, String) {
        let re = use_directive();
        let mut next = self.clone();
        if let Some(caps) = re.captures_iter(sql).last() {
            next.database = Some(unquote(&caps[1]).to_string());
        }
        let cleaned = re.replace_all(sql, "").trim().to_string();
        (next, cleaned)
    }
}

fn use_directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bUSE\s+([`'"]?\w+[`'"]?)\s*;?"#).expect("valid regex"))
}

fn unquote(name: &str) -> &str {
    name.trim_matches(|c| c == '`' || c == '\'' || c == '"')
}

/// Resolve the effective context of every statement in a script, in order.
///
/// Returns `(cleaned_sql, context)` pairs; context-only statements come back
/// with empty SQL and are expected to be skipped by the dispatcher.
pub fn resolve_contexts(
    statements: &[crate::statement::Statement],
    initial: &ExecutionContext,
) -> Vec<(String, ExecutionContext)> {
    let mut context = initial.clone();
    let mut resolved = Vec::with_capacity(statements.len());
    for statement in statements {
        let (next, cleaned) = context.apply(&statement.sql);
        context = next;
        resolved.push((cleaned, context.clone()));
    }
    resolved
}
