//! Tests for query plans

use pretty_assertions::assert_eq;
use sluice_core::{SluiceError, StatementKind, Value};

use super::*;

fn plan(sql: &str, params: &[Value]) -> QueryPlan {
    QueryPlan::build(sql, params).expect("plan")
}

// =============================================================================
// validation
// =============================================================================

#[test]
fn test_parameter_mismatch_is_validation_error() {
    let err = QueryPlan::build("SELECT * FROM users WHERE id = $1 AND org = $2", &[Value::Int64(1)])
        .unwrap_err();
    assert!(matches!(err, SluiceError::Validation(_)));

    let err = QueryPlan::build("   ", &[]).unwrap_err();
    assert!(matches!(err, SluiceError::Validation(_)));
}

// =============================================================================
// cacheability
// =============================================================================

#[test]
fn test_reads_are_cacheable() {
    let p = plan("SELECT * FROM users WHERE id = $1", &[Value::Int64(7)]);
    assert_eq!(p.kind(), StatementKind::Read);
    assert!(p.is_cacheable());
    let key = p.cache_key().expect("key");
    assert!(key.starts_with("users:"));
    assert_eq!(key.split(':').count(), 3);
}

#[test]
fn test_cache_key_depends_on_params_not_whitespace() {
    let a = plan("SELECT * FROM users WHERE id = $1", &[Value::Int64(7)]);
    let b = plan("SELECT *\n FROM users\n WHERE id = $1", &[Value::Int64(7)]);
    let c = plan("SELECT * FROM users WHERE id = $1", &[Value::Int64(8)]);
    assert_eq!(a.cache_key(), b.cache_key());
    assert_ne!(a.cache_key(), c.cache_key());
}

#[test]
fn test_non_deterministic_reads_are_not_cacheable() {
    for sql in [
        "SELECT now()",
        "SELECT * FROM events WHERE at > CURRENT_TIMESTAMP",
        "SELECT * FROM users ORDER BY random() LIMIT 1",
        "SELECT * FROM jobs WHERE id = $1 FOR UPDATE",
    ] {
        let params: Vec<Value> = if sql.contains("$1") { vec![Value::Int64(1)] } else { vec![] };
        assert!(!plan(sql, &params).is_cacheable(), "{sql}");
    }
    // Inside a literal it is just text.
    assert!(plan("SELECT * FROM notes WHERE body = 'now()'", &[]).is_cacheable());
}

#[test]
fn test_writes_are_not_cacheable() {
    let p = plan("UPDATE users SET name = $1 WHERE id = $2", &[
        Value::from("ada"),
        Value::Int64(1),
    ]);
    assert!(p.kind().is_write());
    assert!(!p.is_cacheable());
    assert_eq!(p.cache_key(), None);
    assert_eq!(p.tables().to_vec(), vec!["users".to_string()]);
}

// =============================================================================
// tables
// =============================================================================

#[test]
fn test_referenced_tables() {
    assert_eq!(
        referenced_tables(
            "SELECT * FROM Users u JOIN public.orders o ON o.user_id = u.id WHERE u.id = $1"
        ),
        vec!["users".to_string(), "public.orders".to_string()]
    );
    assert_eq!(
        referenced_tables("INSERT INTO audit (x) SELECT x FROM \"Staging\""),
        vec!["audit".to_string(), "Staging".to_string()]
    );
    assert_eq!(
        referenced_tables("SELECT extract(year FROM created_at) FROM events"),
        vec!["events".to_string()]
    );
    assert_eq!(
        referenced_tables("SELECT * FROM (SELECT id FROM inner_t) s"),
        vec!["inner_t".to_string()]
    );
    assert_eq!(
        referenced_tables("SELECT 'from fake' FROM real_t"),
        vec!["real_t".to_string()]
    );
}

// =============================================================================
// batchability
// =============================================================================

#[test]
fn test_simple_equality_lookup_is_batchable() {
    let p = plan("SELECT id, name FROM users WHERE id = $1", &[Value::Int64(3)]);
    let lookup = p.lookup().expect("lookup");
    assert!(p.is_batchable());
    assert_eq!(lookup.table, "users");
    assert_eq!(lookup.correlation_column, "id");
    assert_eq!(lookup.style, PlaceholderStyle::Dollar);
    assert_eq!(&p.sql()[lookup.predicate.clone()], "= $1");
}

#[test]
fn test_aliased_and_question_mark_lookup() {
    let p = plan("SELECT u.* FROM users AS u WHERE u.org_id = ?", &[Value::Int64(3)]);
    let lookup = p.lookup().expect("lookup");
    assert_eq!(lookup.column, "u.org_id");
    assert_eq!(lookup.correlation_column, "org_id");
    assert_eq!(lookup.style, PlaceholderStyle::QuestionMark);
}

#[test]
fn test_unverifiable_shapes_are_not_batchable() {
    let one = [Value::Int64(1)];
    for sql in [
        // correlation column not in the projection
        "SELECT name FROM users WHERE id = $1",
        // renamed
        "SELECT id AS user_id FROM users WHERE id = $1",
        // aggregate
        "SELECT count(*) FROM orders WHERE user_id = $1",
        // extra clauses
        "SELECT * FROM users WHERE id = $1 ORDER BY name",
        "SELECT * FROM users WHERE id = $1 LIMIT 1",
        "SELECT * FROM users WHERE id = $1 AND active",
        "SELECT * FROM users u JOIN orgs o ON o.id = u.org_id WHERE u.id = $1",
        // other operators
        "SELECT * FROM users WHERE id > $1",
        // literal could hide anything
        "SELECT *, 'x' AS tag FROM users WHERE id = $1",
        // qualifier names another source
        "SELECT * FROM users WHERE other.id = $1",
    ] {
        assert!(!plan(sql, &one).is_batchable(), "{sql}");
    }

    let two = [Value::Int64(1), Value::Int64(2)];
    assert!(!plan("SELECT * FROM t WHERE a = $1 AND b = $2", &two).is_batchable());
    assert!(!plan("SELECT * FROM users WHERE id = $1", &[Value::Null]).is_batchable());
}

#[test]
fn test_cost_is_recorded() {
    assert_eq!(plan("SELECT * FROM users", &[]).estimated_cost(), 6);
}
