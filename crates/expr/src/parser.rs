//! Hand-rolled parser for the aggregation grammar.

use std::fmt;
use std::str::FromStr;

use livemark_core::Value;

use crate::ExprError;

/// Aggregation functions over one source's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    /// Whether this function needs a `source.field` target.
    pub fn requires_field(&self) -> bool {
        !matches!(self, AggFunc::Count)
    }
}

impl FromStr for AggFunc {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(AggFunc::Count),
            "sum" => Ok(AggFunc::Sum),
            "avg" => Ok(AggFunc::Avg),
            "min" => Ok(AggFunc::Min),
            "max" => Ok(AggFunc::Max),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        };
        f.write_str(s)
    }
}

/// Comparison operators for where-clauses and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// `field op value`. A bare `field` parses as `field = true`.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub field: String,
    pub op: CmpOp,
    pub value: Value,
}

/// One parsed aggregation expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub func: AggFunc,
    pub source: String,
    pub field: Option<String>,
    pub where_clause: Option<WhereClause>,
}

/// Parse `func(source[.field] [where <clause>])`.
pub fn parse(input: &str) -> Result<Expression, ExprError> {
    let input = input.trim();
    let open = input
        .find('(')
        .ok_or_else(|| ExprError::Parse(format!("expected '(' in expression: {input}")))?;
    if !input.ends_with(')') {
        return Err(ExprError::Parse(format!("expected ')' at end of expression: {input}")));
    }

    let func_name = input[..open].trim();
    let func = func_name
        .parse::<AggFunc>()
        .map_err(|_| ExprError::UnknownFunction(func_name.to_string()))?;

    let inner = input[open + 1..input.len() - 1].trim();
    if inner.is_empty() {
        return Err(ExprError::Parse("empty expression body".to_string()));
    }

    // Split off the where-clause. "where" must appear as a standalone word.
    let (target, where_clause) = match find_keyword(inner, "where") {
        Some(pos) => {
            let clause = parse_where(inner[pos + "where".len()..].trim())?;
            (inner[..pos].trim(), Some(clause))
        }
        None => (inner, None),
    };

    let (source, field) = match target.split_once('.') {
        Some((s, f)) => (s.trim().to_string(), Some(f.trim().to_string())),
        None => (target.to_string(), None),
    };

    if source.is_empty() {
        return Err(ExprError::Parse("missing source name".to_string()));
    }
    if func.requires_field() && field.is_none() {
        return Err(ExprError::Parse(format!("{func} requires a source.field target")));
    }
    if field.as_deref().map(str::is_empty).unwrap_or(false) {
        return Err(ExprError::Parse(format!("empty field name in: {target}")));
    }

    Ok(Expression {
        func,
        source,
        field,
        where_clause,
    })
}

/// Parse a where-clause body: `field op value`, or a bare `field`
/// (shorthand for `field = true`).
pub fn parse_where(input: &str) -> Result<WhereClause, ExprError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ExprError::Parse("empty where clause".to_string()));
    }

    // Two-char operators first so `<=` doesn't parse as `<` + `=`.
    for op_str in ["!=", "<=", ">=", "=", "<", ">"] {
        if let Some(pos) = find_outside_quotes(input, op_str) {
            let field = input[..pos].trim();
            let value_str = input[pos + op_str.len()..].trim();
            if field.is_empty() {
                return Err(ExprError::Parse(format!("missing field before '{op_str}'")));
            }
            if value_str.is_empty() {
                return Err(ExprError::Parse(format!("missing value after '{op_str}'")));
            }
            let op = match op_str {
                "!=" => CmpOp::Ne,
                "<=" => CmpOp::Le,
                ">=" => CmpOp::Ge,
                "=" => CmpOp::Eq,
                "<" => CmpOp::Lt,
                ">" => CmpOp::Gt,
                _ => unreachable!(),
            };
            return Ok(WhereClause {
                field: field.to_string(),
                op,
                value: parse_value(value_str),
            });
        }
    }

    // `not field`: falsy check.
    if let Some(rest) = input.strip_prefix("not ") {
        let field = rest.trim();
        if !field.is_empty() && field.split_whitespace().count() == 1 {
            return Ok(WhereClause {
                field: field.to_string(),
                op: CmpOp::Eq,
                value: Value::Bool(false),
            });
        }
    }

    // Bare field: truthy check.
    if input.split_whitespace().count() != 1 {
        return Err(ExprError::Parse(format!("cannot parse where clause: {input}")));
    }
    Ok(WhereClause {
        field: input.to_string(),
        op: CmpOp::Eq,
        value: Value::Bool(true),
    })
}

/// Parse a literal: quoted string, bool, i64, f64, unquoted string,
/// in that order.
pub fn parse_value(token: &str) -> Value {
    let token = token.trim();
    if token.len() >= 2 {
        let bytes = token.as_bytes();
        if (bytes[0] == b'\'' && bytes[token.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[token.len() - 1] == b'"')
        {
            return Value::Str(token[1..token.len() - 1].to_string());
        }
    }
    match token {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Str(token.to_string())
}

/// Find `keyword` as a whitespace-delimited word, outside quotes.
fn find_keyword(input: &str, keyword: &str) -> Option<usize> {
    let mut in_quote: Option<char> = None;
    let mut prev_ws = true;
    for (i, c) in input.char_indices() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    in_quote = Some(c);
                } else if prev_ws && input[i..].starts_with(keyword) {
                    let after = i + keyword.len();
                    if after >= input.len()
                        || input[after..].chars().next().map(char::is_whitespace).unwrap_or(true)
                    {
                        return Some(i);
                    }
                }
            }
        }
        prev_ws = c.is_whitespace();
    }
    None
}

/// Find `needle` outside single/double quotes.
fn find_outside_quotes(input: &str, needle: &str) -> Option<usize> {
    let mut in_quote: Option<char> = None;
    for (i, c) in input.char_indices() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    in_quote = Some(c);
                } else if input[i..].starts_with(needle) {
                    return Some(i);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_count() {
        let e = parse("count(tasks)").unwrap();
        assert_eq!(e.func, AggFunc::Count);
        assert_eq!(e.source, "tasks");
        assert!(e.field.is_none());
        assert!(e.where_clause.is_none());
    }

    #[test]
    fn sum_with_field() {
        let e = parse("sum(expenses.amount)").unwrap();
        assert_eq!(e.func, AggFunc::Sum);
        assert_eq!(e.source, "expenses");
        assert_eq!(e.field.as_deref(), Some("amount"));
    }

    #[test]
    fn sum_without_field_fails() {
        assert!(parse("sum(expenses)").is_err());
        assert!(parse("avg(scores)").is_err());
        assert!(parse("min(scores)").is_err());
    }

    #[test]
    fn where_with_operator() {
        let e = parse("count(tasks where status = done)").unwrap();
        let w = e.where_clause.unwrap();
        assert_eq!(w.field, "status");
        assert_eq!(w.op, CmpOp::Eq);
        assert_eq!(w.value, Value::Str("done".into()));
    }

    #[test]
    fn where_bare_field_means_truthy() {
        let e = parse("count(tasks where done)").unwrap();
        let w = e.where_clause.unwrap();
        assert_eq!(w.field, "done");
        assert_eq!(w.op, CmpOp::Eq);
        assert_eq!(w.value, Value::Bool(true));
    }

    #[test]
    fn where_not_field_means_falsy() {
        let e = parse("count(tasks where not done)").unwrap();
        let w = e.where_clause.unwrap();
        assert_eq!(w.field, "done");
        assert_eq!(w.op, CmpOp::Eq);
        assert_eq!(w.value, Value::Bool(false));
    }

    #[test]
    fn where_two_char_ops() {
        let e = parse("count(tasks where priority >= 3)").unwrap();
        let w = e.where_clause.unwrap();
        assert_eq!(w.op, CmpOp::Ge);
        assert_eq!(w.value, Value::Int(3));

        let e = parse("count(tasks where status != 'done')").unwrap();
        let w = e.where_clause.unwrap();
        assert_eq!(w.op, CmpOp::Ne);
        assert_eq!(w.value, Value::Str("done".into()));
    }

    #[test]
    fn quoted_value_keeps_spaces() {
        let e = parse("count(tasks where status = 'in progress')").unwrap();
        assert_eq!(e.where_clause.unwrap().value, Value::Str("in progress".into()));
    }

    #[test]
    fn value_parse_order() {
        assert_eq!(parse_value("'true'"), Value::Str("true".into()));
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("42"), Value::Int(42));
        assert_eq!(parse_value("4.5"), Value::Float(4.5));
        assert_eq!(parse_value("todo"), Value::Str("todo".into()));
    }

    #[test]
    fn unknown_function() {
        assert!(matches!(
            parse("median(x.y)"),
            Err(ExprError::UnknownFunction(f)) if f == "median"
        ));
    }

    #[test]
    fn malformed_inputs() {
        assert!(parse("count tasks").is_err());
        assert!(parse("count()").is_err());
        assert!(parse("count(tasks").is_err());
        assert!(parse_where("= 3").is_err());
        assert!(parse_where("a b c").is_err());
    }
}
