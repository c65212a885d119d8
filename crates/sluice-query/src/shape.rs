//! Query shapes
//!
//! A shape is the statement text with comments dropped, whitespace
//! collapsed and any trailing semicolon removed. Placeholders keep their
//! positions, so statements that differ only in bound values share a shape.
//! Inline literals are kept as written.

use sluice_cache::digest_hex;

use crate::parameters::MASKED_REGIONS_REGEX;

/// Canonical text used to group structurally identical statements
pub fn normalize_shape(sql: &str) -> String {
    let mut shape = String::with_capacity(sql.len());
    let mut last = 0;

    for region in MASKED_REGIONS_REGEX.find_iter(sql) {
        push_collapsed(&mut shape, &sql[last..region.start()]);
        let text = region.as_str();
        if text.starts_with("--") || text.starts_with("/*") {
            push_collapsed(&mut shape, " ");
        } else {
            shape.push_str(text);
        }
        last = region.end();
    }
    push_collapsed(&mut shape, &sql[last..]);

    shape
        .trim()
        .trim_end_matches(';')
        .trim_end()
        .to_string()
}

/// Short, stable identifier of a shape (first 16 hex digits of its SHA-256)
pub fn fingerprint(shape: &str) -> String {
    digest_hex(shape.as_bytes())[..16].to_string()
}

fn push_collapsed(out: &mut String, text: &str) {
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !out.ends_with(' ') {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
    }
}
