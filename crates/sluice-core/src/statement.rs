//! Lightweight statement classification
//!
//! This is not a SQL parser. It looks at the leading keyword (after comments
//! and parentheses) and a couple of clauses, which is enough to route a
//! statement to `query` or `execute` and to decide whether its result may be
//! cached.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static LEADING_COMMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s+|--[^\n]*(?:\n|$)|/\*[\s\S]*?\*/|\()*").expect("valid regex")
});

static RETURNING_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\breturning\b").expect("valid regex"));

static WRITE_IN_CTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(insert\s+into|update\s+\w|delete\s+from|merge\s+into)\b")
        .expect("valid regex")
});

/// What a statement does to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// SELECT, VALUES, SHOW, EXPLAIN and read-only WITH queries
    Read,
    /// INSERT, UPDATE, DELETE, MERGE and data-modifying WITH queries
    Write,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT
    TransactionControl,
    /// DDL and everything else
    Other,
}

impl StatementKind {
    pub fn classify(sql: &str) -> Self {
        let keyword = leading_keyword(sql);
        match keyword.as_str() {
            "select" | "values" | "show" | "explain" | "table" => StatementKind::Read,
            "with" => {
                if WRITE_IN_CTE.is_match(sql) {
                    StatementKind::Write
                } else {
                    StatementKind::Read
                }
            }
            "insert" | "update" | "delete" | "merge" | "upsert" | "replace" => {
                StatementKind::Write
            }
            "begin" | "start" | "commit" | "rollback" | "savepoint" | "release" | "end" => {
                StatementKind::TransactionControl
            }
            _ => StatementKind::Other,
        }
    }

    pub fn is_read(self) -> bool {
        self == StatementKind::Read
    }

    pub fn is_write(self) -> bool {
        self == StatementKind::Write
    }
}

/// Whether the driver should run this statement through `query`
pub fn returns_rows(sql: &str) -> bool {
    match StatementKind::classify(sql) {
        StatementKind::Read => true,
        StatementKind::Write => RETURNING_CLAUSE.is_match(sql),
        StatementKind::TransactionControl | StatementKind::Other => false,
    }
}

/// Lowercased first keyword of the statement
pub fn leading_keyword(sql: &str) -> String {
    let skip = LEADING_COMMENTS.find(sql).map(|m| m.end()).unwrap_or(0);
    sql[skip..]
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Shortened SQL for log fields
pub fn sql_preview(sql: &str) -> String {
    const MAX: usize = 100;
    let collapsed: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX {
        collapsed
    } else {
        let head: String = collapsed.chars().take(MAX).collect();
        format!("{}...", head)
    }
}
