//! Heuristic statement cost
//!
//! The estimate is advisory: it feeds logs and statistics, never a decision
//! about how or whether a statement runs.

use std::sync::LazyLock;

use regex::Regex;
use sluice_core::StatementKind;

use crate::parameters::mask_strings_and_comments;

const BASE_COST: u32 = 1;
const JOIN_COST: u32 = 3;
const ORDER_BY_COST: u32 = 2;
const GROUP_BY_COST: u32 = 2;
const UNION_COST: u32 = 3;
const EXISTS_COST: u32 = 2;
const IN_LIST_COST: u32 = 1;
const SUBSELECT_COST: u32 = 3;
const UNFILTERED_SCAN_COST: u32 = 5;

static JOIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bjoin\b").expect("valid regex"));
static ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\border\s+by\b").expect("valid regex"));
static GROUP_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bgroup\s+by\b").expect("valid regex"));
static UNION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bunion\b").expect("valid regex"));
static EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bexists\b").expect("valid regex"));
static IN_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bin\s*\(").expect("valid regex"));
static SUBSELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*select\b").expect("valid regex"));
static FROM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bfrom\b").expect("valid regex"));
static WHERE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bwhere\b").expect("valid regex"));

/// Weighted count of expensive constructs in `sql`
///
/// | construct | weight |
/// |---|---|
/// | base | 1 |
/// | each JOIN | 3 |
/// | ORDER BY | 2 |
/// | GROUP BY | 2 |
/// | each UNION | 3 |
/// | EXISTS | 2 |
/// | IN ( | 1 |
/// | each sub-select | 3 |
/// | read with FROM but no WHERE | 5 |
pub fn estimate_cost(sql: &str) -> u32 {
    let masked = mask_strings_and_comments(sql);
    let text = masked.as_str();
    let count = |re: &Regex| re.find_iter(text).count() as u32;
    let flag = |re: &Regex, weight: u32| if re.is_match(text) { weight } else { 0 };

    let mut cost = BASE_COST;
    cost += count(&JOIN) * JOIN_COST;
    cost += flag(&ORDER_BY, ORDER_BY_COST);
    cost += flag(&GROUP_BY, GROUP_BY_COST);
    cost += count(&UNION) * UNION_COST;
    cost += flag(&EXISTS, EXISTS_COST);
    cost += flag(&IN_LIST, IN_LIST_COST);
    cost += count(&SUBSELECT) * SUBSELECT_COST;

    if StatementKind::classify(sql).is_read() && FROM.is_match(text) && !WHERE.is_match(text) {
        cost += UNFILTERED_SCAN_COST;
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_lookup_is_cheap() {
        assert_eq!(estimate_cost("SELECT * FROM users WHERE id = $1"), 1);
        assert_eq!(estimate_cost("SELECT 1"), 1);
    }

    #[test]
    fn test_unfiltered_scan_penalty() {
        assert_eq!(estimate_cost("SELECT * FROM users"), 6);
        assert_eq!(estimate_cost("DELETE FROM users"), 1);
    }

    #[test]
    fn test_weighted_constructs() {
        let sql = "SELECT u.id, count(*) FROM users u \
                   JOIN orders o ON o.user_id = u.id \
                   LEFT JOIN items i ON i.order_id = o.id \
                   WHERE u.org IN (SELECT id FROM orgs) \
                   GROUP BY u.id ORDER BY 2";
        // base 1 + 2 joins 6 + group 2 + order 2 + in 1 + subselect 3
        assert_eq!(estimate_cost(sql), 15);
    }

    #[test]
    fn test_keywords_in_literals_do_not_count() {
        assert_eq!(
            estimate_cost("SELECT * FROM notes WHERE body = 'join us, order by phone'"),
            1
        );
    }

    #[test]
    fn test_union_and_exists() {
        let sql = "SELECT id FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b.a = a.id) \
                   UNION SELECT id FROM c WHERE c.x = 1";
        // base 1 + union 3 + exists 2 + subselect 3
        assert_eq!(estimate_cost(sql), 9);
    }
}
