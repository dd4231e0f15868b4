//! SQL statement extraction and grouping.
//!
//! Scripts are UTF-8 text with statements delimited by `;`. The splitter is
//! aware of string literals and comments, so a semicolon inside `'...'` or
//! behind `--` does not terminate a statement. Blank and comment-only
//! fragments are discarded before dispatch.

use std::path::Path;
use std::sync::Arc;

use crate::error::CheckError;

/// One SQL command extracted from a script. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Position of the statement within its source script, starting at 1.
    pub id: usize,
    pub sql: String,
    pub source: Arc<str>,
}

impl Statement {
    /// A short preview of the statement text for logs and reports.
    pub fn preview(&self) -> String {
        preview(&self.sql, 80)
    }

    /// The group key for batched execution: the leading SQL verb, except for
    /// `CREATE` statements which use their first four tokens so that
    /// `CREATE TABLE`, `CREATE STREAM` and `CREATE STAGE` land in distinct
    /// groups.
    pub fn group_key(&self) -> String {
        let mut tokens = self.sql.split_whitespace();
        let first = match tokens.next() {
            Some(t) => t.to_ascii_uppercase(),
            None => return String::new(),
        };
        if first == "CREATE" {
            let mut key = first;
            for token in tokens.take(3) {
                key.push(' ');
                key.push_str(&token.to_ascii_uppercase());
            }
            key
        } else {
            first
        }
    }
}

pub(crate) fn preview(sql: &str, max: usize) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

/// Split a script into statements, discarding empty and comment-only
/// fragments.
///
/// Handles:
/// - single-line comments (`-- ...`),
/// - multi-line comments (`/* ... */`),
/// - semicolons inside single-quoted strings, with `''` escapes.
pub fn split_script(script: &str, source: impl Into<Arc<str>>) -> Vec<Statement> {
    let source: Arc<str> = source.into();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut chars = script.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
                current.push(ch);
            }
            continue;
        }
        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }
        if in_string {
            current.push(ch);
            if ch == '\'' {
                // '' escapes a quote inside the literal
                if chars.peek() == Some(&'\'') {
                    current.push(chars.next().unwrap());
                } else {
                    in_string = false;
                }
            }
            continue;
        }
        match ch {
            '-' if chars.peek() == Some(&'-') => {
                chars.next();
                in_line_comment = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                in_block_comment = true;
            }
            '\'' => {
                in_string = true;
                current.push(ch);
            }
            ';' => {
                push_fragment(&mut statements, &mut current, &source);
            }
            _ => current.push(ch),
        }
    }
    push_fragment(&mut statements, &mut current, &source);
    statements
}

fn push_fragment(statements: &mut Vec<Statement>, current: &mut String, source: &Arc<str>) {
    let sql = current.trim();
    if !sql.is_empty() {
        statements.push(Statement {
            id: statements.len() + 1,
            sql: sql.to_string(),
            source: Arc::clone(source),
        });
    }
    current.clear();
}

/// Read a UTF-8 script file and split it into statements.
pub fn load_script_file(path: &Path) -> Result<Vec<Statement>, CheckError> {
    let text = std::fs::read_to_string(path).map_err(|source| CheckError::ScriptRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(split_script(&text, path.to_string_lossy().into_owned()))
}

/// Partition statements into maximal runs sharing one group key.
///
/// Runs preserve script order: a later group never starts before an earlier
/// one finishes, which keeps DDL dependencies intact (table creation before
/// data load) while statements inside a run stay independent.
pub fn group_statements(statements: Vec<Statement>) -> Vec<Vec<Statement>> {
    let mut groups: Vec<Vec<Statement>> = Vec::new();
    for statement in statements {
        let key = statement.group_key();
        match groups.last_mut() {
            Some(group) if group[0].group_key() == key => group.push(statement),
            _ => groups.push(vec![statement]),
        }
    }
    groups
}
