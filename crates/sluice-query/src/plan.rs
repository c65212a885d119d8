//! Per-call query plans
//!
//! A [`QueryPlan`] is built for every optimized call and thrown away when the
//! call completes. It records what the optimizer needs to decide between
//! the cache, the batcher and direct execution.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use sluice_cache::CacheKey;
use sluice_core::{Result, SluiceError, StatementKind, Value};

use crate::cost::estimate_cost;
use crate::parameters::{
    MASKED_REGIONS_REGEX, PlaceholderStyle, Placeholders, has_masked_regions,
    mask_strings_and_comments, validate_parameters,
};
use crate::shape::{fingerprint, normalize_shape};

#[cfg(test)]
mod tests;

/// Entity used in cache keys of statements that reference no table
const TABLELESS_ENTITY: &str = "query";

static NON_DETERMINISTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:now|clock_timestamp|statement_timestamp|transaction_timestamp|timeofday|sysdate|getdate|random|rand|uuid|gen_random_uuid|uuid_generate_v[14]|newid|nextval|currval|setval|setseed)\s*\(|\b(?:current_timestamp|current_date|current_time|localtime|localtimestamp)\b",
    )
    .expect("valid regex")
});

static LOCKING_READ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfor\s+(?:update|share|no\s+key\s+update|key\s+share)\b")
        .expect("valid regex")
});

static TABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:from|join|into|update)\s+((?:"[^"]+"|[a-z_][\w$]*)(?:\.(?:"[^"]+"|[a-z_][\w$]*))?)"#,
    )
    .expect("valid regex")
});

static EQUALITY_LOOKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*select\s+(?P<projection>.+?)\s+from\s+(?P<table>[a-z_][\w$]*(?:\.[a-z_][\w$]*)?)(?:\s+(?:as\s+)?(?P<alias>[a-z_]\w*))?\s+where\s+(?P<column>(?:[a-z_]\w*\.)?[a-z_]\w*)\s*(?P<predicate>=\s*(?:\$1|\?))\s*;?\s*$",
    )
    .expect("valid regex")
});

/// A single-predicate equality lookup that can be batched into one
/// membership query
///
/// Only `SELECT <columns> FROM <table> [alias] WHERE <column> = <placeholder>`
/// qualifies, with one bound parameter and a projection that visibly
/// includes the predicate column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqualityLookup {
    /// Table being read
    pub table: String,
    /// Predicate column as written, possibly qualified
    pub column: String,
    /// Result column used to route rows back to callers
    pub correlation_column: String,
    pub style: PlaceholderStyle,
    /// Byte range of `= <placeholder>` in the statement text
    pub(crate) predicate: Range<usize>,
}

impl EqualityLookup {
    /// Detect an equality lookup, or `None` if the shape cannot be verified.
    pub fn detect(sql: &str, params: &[Value]) -> Option<Self> {
        if params.len() != 1 || matches!(params[0], Value::Null | Value::Array(_)) {
            return None;
        }
        // Literals, quoted identifiers and comments could hide anything.
        if has_masked_regions(sql) {
            return None;
        }

        let caps = EQUALITY_LOOKUP.captures(sql)?;
        let projection = caps.name("projection")?.as_str();
        let table = caps.name("table")?.as_str();
        let alias = caps.name("alias").map(|m| m.as_str());
        let column = caps.name("column")?.as_str();
        let predicate = caps.name("predicate")?;

        if let Some(alias) = alias {
            if is_reserved(alias) {
                return None;
            }
        }

        let (qualifier, bare) = match column.split_once('.') {
            Some((qualifier, bare)) => (Some(qualifier), bare),
            None => (None, column),
        };
        let table_name = table.rsplit('.').next().unwrap_or(table);
        let names_source = |name: &str| {
            name.eq_ignore_ascii_case(table_name) || alias.is_some_and(|a| name.eq_ignore_ascii_case(a))
        };
        if qualifier.is_some_and(|q| !names_source(q)) {
            return None;
        }

        if !projection_exposes(projection, bare, &names_source) {
            return None;
        }

        let style = if predicate.as_str().ends_with('?') {
            PlaceholderStyle::QuestionMark
        } else {
            PlaceholderStyle::Dollar
        };

        Some(Self {
            table: normalize_identifier(table),
            column: column.to_string(),
            correlation_column: bare.to_string(),
            style,
            predicate: predicate.range(),
        })
    }
}

/// Whether the projection returns `column` under its own name
fn projection_exposes(projection: &str, column: &str, names_source: &dyn Fn(&str) -> bool) -> bool {
    if projection.contains('(') {
        return false;
    }
    let projection = projection.trim();
    let projection = match projection.get(..9) {
        Some(head) if head.eq_ignore_ascii_case("distinct ") => &projection[9..],
        _ => projection,
    };

    projection.split(',').map(str::trim).any(|item| {
        if item == "*" || item.eq_ignore_ascii_case(column) {
            return true;
        }
        match item.split_once('.') {
            Some((qualifier, rest)) => {
                names_source(qualifier) && (rest == "*" || rest.eq_ignore_ascii_case(column))
            }
            None => false,
        }
    })
}

fn is_reserved(word: &str) -> bool {
    const RESERVED: &[&str] = &[
        "where", "join", "inner", "left", "right", "full", "cross", "natural", "on", "group",
        "order", "limit", "offset", "union", "having", "window", "for",
    ];
    RESERVED.iter().any(|r| word.eq_ignore_ascii_case(r))
}

/// Unquoted identifiers fold to lower case; quoted ones keep their case
fn normalize_identifier(raw: &str) -> String {
    raw.split('.')
        .map(|part| match part.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
            Some(quoted) => quoted.to_string(),
            None => part.to_ascii_lowercase(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Tables referenced after FROM, JOIN, INTO or UPDATE, in order of first
/// appearance
///
/// `FROM` inside a function call (`extract(year FROM ts)`) is not a table
/// reference.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let hidden: Vec<Range<usize>> = MASKED_REGIONS_REGEX
        .find_iter(sql)
        .filter(|m| !m.as_str().starts_with('"'))
        .map(|m| m.range())
        .collect();
    let masked = mask_strings_and_comments(sql);

    let mut tables: Vec<String> = Vec::new();
    for caps in TABLE_REFERENCE.captures_iter(sql) {
        let Some(whole) = caps.get(0) else { continue };
        if hidden.iter().any(|r| r.contains(&whole.start())) {
            continue;
        }
        if inside_function_call(&masked, whole.start()) {
            continue;
        }
        let table = normalize_identifier(&caps[1]);
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    tables
}

/// True if the innermost open parenthesis before `pos` is a call rather
/// than a sub-select.
fn inside_function_call(masked: &str, pos: usize) -> bool {
    let mut depth = 0usize;
    for (index, ch) in masked[..pos].char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' if depth > 0 => depth -= 1,
            '(' => {
                let after = masked[index + 1..].trim_start();
                let is_subselect = after
                    .get(..6)
                    .is_some_and(|word| word.eq_ignore_ascii_case("select"));
                return !is_subselect;
            }
            _ => {}
        }
    }
    false
}

/// Everything the optimizer decides about one call
#[derive(Debug, Clone)]
pub struct QueryPlan {
    sql: String,
    params: Vec<Value>,
    shape: String,
    kind: StatementKind,
    tables: Vec<String>,
    placeholders: Placeholders,
    estimated_cost: u32,
    cacheable: bool,
    cache_key: Option<String>,
    lookup: Option<EqualityLookup>,
}

impl QueryPlan {
    /// Analyze a statement and its parameters.
    ///
    /// Fails with `Validation` on an empty statement or when the bound
    /// parameters do not match the placeholders; no I/O happens first.
    pub fn build(sql: &str, params: &[Value]) -> Result<Self> {
        if sql.trim().is_empty() {
            return Err(SluiceError::Validation("empty statement".into()));
        }
        let placeholders = validate_parameters(sql, params)?;
        let kind = StatementKind::classify(sql);
        let shape = normalize_shape(sql);
        let tables = referenced_tables(sql);

        let masked = mask_strings_and_comments(sql);
        let cacheable =
            kind.is_read() && !NON_DETERMINISTIC.is_match(&masked) && !LOCKING_READ.is_match(&masked);

        let cache_key = cacheable.then(|| {
            let entity = tables.first().map(String::as_str).unwrap_or(TABLELESS_ENTITY);
            CacheKey::new(entity, fingerprint(&shape))
                .with_params(params)
                .build()
        });

        let lookup = if kind.is_read() {
            EqualityLookup::detect(sql, params)
        } else {
            None
        };

        Ok(Self {
            sql: sql.to_string(),
            params: params.to_vec(),
            estimated_cost: estimate_cost(sql),
            shape,
            kind,
            tables,
            placeholders,
            cacheable,
            cache_key,
            lookup,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// First referenced table; the namespace of this plan's cache key
    pub fn primary_table(&self) -> Option<&str> {
        self.tables.first().map(String::as_str)
    }

    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    pub fn estimated_cost(&self) -> u32 {
        self.estimated_cost
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn is_batchable(&self) -> bool {
        self.lookup.is_some()
    }

    pub fn lookup(&self) -> Option<&EqualityLookup> {
        self.lookup.as_ref()
    }
}
