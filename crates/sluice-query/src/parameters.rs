//! Placeholder analysis
//!
//! Two placeholder styles are understood:
//!
//! - Positional dollar parameters: `$1`, `$2` (PostgreSQL)
//! - Question marks: `?` (MySQL, SQLite)
//!
//! A statement may use one style only. Placeholders inside string literals,
//! quoted identifiers and comments are ignored.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sluice_core::{Result, SluiceError, Value};

#[cfg(test)]
mod tests;

static DOLLAR_POSITIONAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("valid regex"));

// `?|` and `?&` are PostgreSQL jsonb operators, not placeholders.
static QUESTION_MARK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?([|&])?").expect("valid regex"));

// String literals, quoted identifiers and comments
pub(crate) static MASKED_REGIONS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"]|"")*"|--[^\n]*|/\*[\s\S]*?\*/"#)
        .expect("valid regex")
});

/// Placeholder syntax used by a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ...
    Dollar,
    /// `?`
    QuestionMark,
}

/// What a statement expects in terms of bound parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    /// `None` when the statement has no placeholders
    pub style: Option<PlaceholderStyle>,
    /// Number of parameters the statement must be bound with
    pub expected: usize,
}

impl Placeholders {
    fn none() -> Self {
        Self {
            style: None,
            expected: 0,
        }
    }
}

/// Scan `sql` for placeholders.
///
/// For dollar placeholders the expected count is the highest index, and
/// every index from `$1` up to it must appear. Each `?` is one parameter.
pub fn scan_placeholders(sql: &str) -> Result<Placeholders> {
    let masked = mask_strings_and_comments(sql);

    let mut positions = BTreeSet::new();
    for cap in DOLLAR_POSITIONAL_REGEX.captures_iter(&masked) {
        let position = cap[1].parse::<usize>().map_err(|_| {
            SluiceError::Validation(format!("placeholder ${} is out of range", &cap[1]))
        })?;
        if position == 0 {
            return Err(SluiceError::Validation(
                "placeholder $0 is not valid, positions start at $1".into(),
            ));
        }
        positions.insert(position);
    }

    let question_marks = QUESTION_MARK_REGEX
        .captures_iter(&masked)
        .filter(|cap| cap.get(1).is_none())
        .count();

    match (positions.last().copied(), question_marks) {
        (None, 0) => Ok(Placeholders::none()),
        (Some(_), n) if n > 0 => Err(SluiceError::Validation(
            "statement mixes $n and ? placeholders".into(),
        )),
        (Some(highest), _) => {
            if let Some(missing) = (1..=highest).find(|p| !positions.contains(p)) {
                return Err(SluiceError::Validation(format!(
                    "placeholder ${} is never used but ${} is",
                    missing, highest
                )));
            }
            Ok(Placeholders {
                style: Some(PlaceholderStyle::Dollar),
                expected: highest,
            })
        }
        (None, n) => Ok(Placeholders {
            style: Some(PlaceholderStyle::QuestionMark),
            expected: n,
        }),
    }
}

/// Check that `params` matches the placeholders in `sql`.
pub fn validate_parameters(sql: &str, params: &[Value]) -> Result<Placeholders> {
    let placeholders = scan_placeholders(sql)?;
    if placeholders.expected != params.len() {
        return Err(SluiceError::Validation(format!(
            "statement expects {} parameter(s) but {} were bound",
            placeholders.expected,
            params.len()
        )));
    }
    Ok(placeholders)
}

/// Replace string literals, quoted identifiers and comments with spaces.
///
/// Byte offsets are preserved, so positions found in the masked text are
/// valid in the original.
pub fn mask_strings_and_comments(sql: &str) -> String {
    MASKED_REGIONS_REGEX
        .replace_all(sql, |caps: &regex::Captures| " ".repeat(caps[0].len()))
        .into_owned()
}

/// Whether `sql` contains anything [`mask_strings_and_comments`] would hide
pub fn has_masked_regions(sql: &str) -> bool {
    MASKED_REGIONS_REGEX.is_match(sql)
}
