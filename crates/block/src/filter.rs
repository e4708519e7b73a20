//! Row-level filters: the where-clause grammar of the expression language
//! plus a leading `not field` form. Filtering is a view over the block's
//! data, never a mutation.

use livemark_core::{lookup_field, Row, Value};
use livemark_expr::{parse_where, ExprError, WhereClause};

#[derive(Debug, Clone, PartialEq)]
pub enum BlockFilter {
    Where(WhereClause),
    /// `not field`: keep rows where the field is falsy.
    NotTruthy(String),
}

/// Parse a filter expression. The standalone word `operator` is substituted
/// with the configured operator identity before parsing.
pub fn parse_filter(expr: &str, operator: &str) -> Result<BlockFilter, ExprError> {
    let substituted = substitute_operator(expr, operator);
    let s = substituted.trim();
    if s.is_empty() {
        return Err(ExprError::Parse("empty filter expression".to_string()));
    }

    if let Some(rest) = s.strip_prefix("not ") {
        let field = rest.trim();
        if field.is_empty() || field.split_whitespace().count() != 1 {
            return Err(ExprError::Parse(format!("cannot parse filter: {s}")));
        }
        return Ok(BlockFilter::NotTruthy(field.to_string()));
    }

    parse_where(s).map(BlockFilter::Where)
}

/// Apply a filter as a view: the result is a subsequence of `rows`.
pub fn apply_filter(filter: &BlockFilter, rows: &[Row]) -> Vec<Row> {
    rows.iter().filter(|r| matches(filter, r)).cloned().collect()
}

fn matches(filter: &BlockFilter, row: &Row) -> bool {
    match filter {
        BlockFilter::Where(clause) => livemark_expr::evaluator::row_matches(clause, row),
        BlockFilter::NotTruthy(field) => !lookup_field(row, field)
            .unwrap_or(&Value::Null)
            .is_truthy(),
    }
}

/// Replace the standalone word `operator` (not part of a longer
/// identifier) with the operator identity.
fn substitute_operator(expr: &str, operator: &str) -> String {
    const NEEDLE: &str = "operator";
    let mut out = String::with_capacity(expr.len());
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < expr.len() {
        if expr[i..].starts_with(NEEDLE) {
            let before_ok = i == 0 || !is_ident_char(bytes[i - 1]);
            let after = i + NEEDLE.len();
            let after_ok = after >= expr.len() || !is_ident_char(bytes[after]);
            if before_ok && after_ok {
                out.push_str(operator);
                i = after;
                continue;
            }
        }
        // Advance one full character, not one byte.
        let ch_len = expr[i..].chars().next().map(char::len_utf8).unwrap_or(1);
        out.push_str(&expr[i..i + ch_len]);
        i += ch_len;
    }
    out
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
