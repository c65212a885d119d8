//! Equality-lookup rewrite and result distribution

use sluice_core::{QueryResult, Result, Row, SluiceError, Value};

use crate::parameters::PlaceholderStyle;
use crate::plan::EqualityLookup;

/// Deduplicate keys, treating widened integers as equal
pub fn distinct_keys<'a>(keys: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
    let mut distinct: Vec<Value> = Vec::new();
    for key in keys {
        if !distinct.iter().any(|seen| seen.loosely_eq(key)) {
            distinct.push(key.clone());
        }
    }
    distinct
}

/// Turn `col = $1` into `col = ANY($1)` bound to one array, or `col = ?`
/// into `col IN (?, ?, ...)` bound to one parameter per key.
///
/// `sql` must be the statement `lookup` was detected on.
pub fn rewrite_lookup(
    sql: &str,
    lookup: &EqualityLookup,
    keys: &[Value],
) -> Result<(String, Vec<Value>)> {
    if keys.is_empty() {
        return Err(SluiceError::Validation("no keys to batch".into()));
    }
    let predicate = sql
        .get(lookup.predicate.clone())
        .filter(|text| text.starts_with('='))
        .ok_or_else(|| {
            SluiceError::Validation("lookup predicate does not match statement text".into())
        })?;
    tracing::trace!(predicate, keys = keys.len(), "rewriting equality lookup");

    let (replacement, params) = match lookup.style {
        PlaceholderStyle::Dollar => ("= ANY($1)".to_string(), vec![Value::Array(keys.to_vec())]),
        PlaceholderStyle::QuestionMark => {
            let marks = vec!["?"; keys.len()].join(", ");
            (format!("IN ({})", marks), keys.to_vec())
        }
    };

    let mut rewritten = String::with_capacity(sql.len() + replacement.len());
    rewritten.push_str(&sql[..lookup.predicate.start]);
    rewritten.push_str(&replacement);
    rewritten.push_str(&sql[lookup.predicate.end..]);
    Ok((rewritten, params))
}

/// Rows of a batched result whose correlation column matches `key`
pub fn rows_for_key(result: &QueryResult, column: &str, key: &Value) -> Vec<Row> {
    result
        .rows
        .iter()
        .filter(|row| row.get_by_name(column).is_some_and(|value| value.loosely_eq(key)))
        .cloned()
        .collect()
}
