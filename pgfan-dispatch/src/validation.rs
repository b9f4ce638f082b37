//! Structural checks for search templates.
//!
//! This is a sanity check run before any connection is opened, not a SQL
//! parser. It cannot spot semantically invalid SQL, a second statement
//! hidden inside a string literal, or injection; callers must trust the
//! template they pass in.
//!
//! Rules, checked in order (the first violation is reported):
//!
//! 1. the template is not blank;
//! 2. after any leading `--` comment lines it starts with `SELECT` followed by
//!    whitespace (case-insensitive);
//! 3. with `--` comments removed, splitting on `;` leaves exactly one
//!    non-blank statement;
//! 4. it contains at least one vector distance operator token.
//!
//! ```rust
//! use pgfan_dispatch::validation::validate_sql_template;
//!
//! assert!(validate_sql_template("SELECT id FROM t ORDER BY embedding <-> $1").is_ok());
//! assert!(validate_sql_template("UPDATE t SET x = 1").is_err());
//! ```

use std::sync::LazyLock;

use regex_lite::Regex;

use crate::error::ValidationError;
use crate::types::DistanceOperator;

static LEADING_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:--.*\s*)*SELECT\s+").expect("leading SELECT pattern is valid")
});

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)--.*$").expect("line comment pattern is valid"));

/// Validate a search template, returning the first rule it breaks.
pub fn validate_sql_template(sql: &str) -> Result<(), ValidationError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    if !LEADING_SELECT.is_match(trimmed) {
        return Err(ValidationError::NotSelect);
    }

    let count = count_statements(trimmed);
    if count != 1 {
        return Err(ValidationError::StatementCount(count));
    }

    if DistanceOperator::find_in(trimmed).is_empty() {
        return Err(ValidationError::MissingVectorOperator);
    }

    Ok(())
}

/// Count the non-blank `;`-separated statements once `--` comments are gone.
pub fn count_statements(sql: &str) -> usize {
    let stripped = LINE_COMMENT.replace_all(sql, "");
    stripped
        .split(';')
        .filter(|s| !s.trim().is_empty())
        .count()
}
