//! Tests for placeholder analysis

use pretty_assertions::assert_eq;
use sluice_core::{SluiceError, Value};

use super::*;

#[test]
fn test_dollar_placeholders() {
    let found = scan_placeholders("SELECT * FROM users WHERE id = $1 AND org = $2").expect("scan");
    assert_eq!(found.style, Some(PlaceholderStyle::Dollar));
    assert_eq!(found.expected, 2);
}

#[test]
fn test_repeated_dollar_placeholder_counts_once() {
    let found = scan_placeholders("SELECT * FROM users WHERE id = $1 OR parent_id = $1")
        .expect("scan");
    assert_eq!(found.expected, 1);
}

#[test]
fn test_question_mark_placeholders() {
    let found = scan_placeholders("INSERT INTO t (a, b) VALUES (?, ?)").expect("scan");
    assert_eq!(found.style, Some(PlaceholderStyle::QuestionMark));
    assert_eq!(found.expected, 2);
}

#[test]
fn test_no_placeholders() {
    let found = scan_placeholders("SELECT 1").expect("scan");
    assert_eq!(found.style, None);
    assert_eq!(found.expected, 0);
}

#[test]
fn test_placeholders_in_literals_and_comments_are_ignored() {
    let sql = "SELECT '$1 or ?' AS label, \"odd?name\" FROM t -- where x = ?\n WHERE id = $1 /* $2 */";
    let found = scan_placeholders(sql).expect("scan");
    assert_eq!(found.style, Some(PlaceholderStyle::Dollar));
    assert_eq!(found.expected, 1);
}

#[test]
fn test_jsonb_operators_are_not_placeholders() {
    let found = scan_placeholders("SELECT * FROM docs WHERE tags ?| $1").expect("scan");
    assert_eq!(found.style, Some(PlaceholderStyle::Dollar));
}

#[test]
fn test_mixed_styles_rejected() {
    let err = scan_placeholders("SELECT * FROM t WHERE a = $1 AND b = ?").unwrap_err();
    assert!(matches!(err, SluiceError::Validation(_)));
}

#[test]
fn test_gap_in_dollar_positions_rejected() {
    let err = scan_placeholders("SELECT * FROM t WHERE a = $1 AND b = $3").unwrap_err();
    assert!(err.to_string().contains("$2"));

    let err = scan_placeholders("SELECT * FROM t WHERE a = $0").unwrap_err();
    assert!(matches!(err, SluiceError::Validation(_)));
}

#[test]
fn test_validate_parameter_count() {
    assert!(validate_parameters("SELECT * FROM t WHERE id = $1", &[Value::Int64(1)]).is_ok());

    let err = validate_parameters("SELECT * FROM t WHERE id = $1", &[]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Validation error: statement expects 1 parameter(s) but 0 were bound"
    );

    assert!(validate_parameters("SELECT 1", &[Value::Int64(1)]).is_err());
}

#[test]
fn test_mask_preserves_offsets() {
    let sql = "SELECT 'abc' FROM t";
    let masked = mask_strings_and_comments(sql);
    assert_eq!(masked.len(), sql.len());
    assert_eq!(masked, format!("SELECT {} FROM t", " ".repeat(5)));
    assert!(has_masked_regions(sql));
    assert!(!has_masked_regions("SELECT id FROM t"));
}
