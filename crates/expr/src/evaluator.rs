//! Pure evaluation of parsed expressions against `source → rows` maps.
//!
//! The caller (the page session) collects each named source's latest
//! fetched rows first; evaluation itself never does I/O, so expression
//! slots stay consistent with what the page currently shows.

use std::collections::HashMap;

use indexmap::IndexMap;
use livemark_core::{lookup_field, Row, Value};
use serde::{Serialize, Serializer};

use crate::parser::{AggFunc, CmpOp, Expression, WhereClause};
use crate::ExprError;

/// Per-slot result: a value, or an error message rendered as `{"error": …}`
/// in the push payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprOutcome {
    Value(Value),
    Error(String),
}

impl Serialize for ExprOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExprOutcome::Value(v) => v.serialize(serializer),
            ExprOutcome::Error(msg) => {
                let mut obj = serde_json::Map::new();
                obj.insert("error".to_string(), serde_json::Value::String(msg.clone()));
                serde_json::Value::Object(obj).serialize(serializer)
            }
        }
    }
}

/// Evaluate every registered expression slot. Individual failures land in
/// their own slot; one bad expression never blocks the rest.
pub fn evaluate_expressions(
    exprs: &IndexMap<String, Expression>,
    rows_by_source: &HashMap<String, Vec<Row>>,
) -> IndexMap<String, ExprOutcome> {
    exprs
        .iter()
        .map(|(id, expr)| {
            let outcome = match evaluate(expr, rows_by_source) {
                Ok(v) => ExprOutcome::Value(v),
                Err(e) => ExprOutcome::Error(e.to_string()),
            };
            (id.clone(), outcome)
        })
        .collect()
}

/// Evaluate one expression.
pub fn evaluate(
    expr: &Expression,
    rows_by_source: &HashMap<String, Vec<Row>>,
) -> Result<Value, ExprError> {
    let rows = rows_by_source
        .get(&expr.source)
        .ok_or_else(|| ExprError::SourceNotFound(expr.source.clone()))?;

    let filtered: Vec<&Row> = match &expr.where_clause {
        Some(clause) => rows.iter().filter(|r| row_matches(clause, r)).collect(),
        None => rows.iter().collect(),
    };

    match expr.func {
        AggFunc::Count => match &expr.field {
            // count(src.field): only rows where the field is present and non-null.
            Some(field) => {
                let n = filtered
                    .iter()
                    .filter(|r| {
                        lookup_field(r, field)
                            .map(|v| !matches!(v, Value::Null))
                            .unwrap_or(false)
                    })
                    .count();
                Ok(Value::Int(n as i64))
            }
            None => Ok(Value::Int(filtered.len() as i64)),
        },
        AggFunc::Sum => Ok(Value::Float(sum_field(&filtered, expr.field.as_deref())?)),
        AggFunc::Avg => {
            let values = numeric_values(&filtered, expr.field.as_deref())?;
            if values.is_empty() {
                return Ok(Value::Float(0.0));
            }
            Ok(Value::Float(values.iter().sum::<f64>() / values.len() as f64))
        }
        AggFunc::Min => Ok(fold_extreme(&filtered, expr.field.as_deref(), true)),
        AggFunc::Max => Ok(fold_extreme(&filtered, expr.field.as_deref(), false)),
    }
}

/// Apply a where-clause to one row. Missing fields read as null.
pub fn row_matches(clause: &WhereClause, row: &Row) -> bool {
    let actual = lookup_field(row, &clause.field).unwrap_or(&Value::Null);
    compare(clause.op, actual, &clause.value)
}

/// Comparison semantics: bool expectations use truthiness; everything else
/// coerces to float when both sides can, and falls back to string compare.
fn compare(op: CmpOp, actual: &Value, expected: &Value) -> bool {
    if let Value::Bool(b) = expected {
        let truthy = actual.is_truthy();
        return match op {
            CmpOp::Eq => truthy == *b,
            CmpOp::Ne => truthy != *b,
            _ => false,
        };
    }

    if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Gt => a > b,
            CmpOp::Le => a <= b,
            CmpOp::Ge => a >= b,
        };
    }

    let a = actual.display();
    let b = expected.display();
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Gt => a > b,
        CmpOp::Le => a <= b,
        CmpOp::Ge => a >= b,
    }
}

fn sum_field(rows: &[&Row], field: Option<&str>) -> Result<f64, ExprError> {
    Ok(numeric_values(rows, field)?.iter().sum())
}

/// Collect each row's field as f64. Nulls and missing fields are skipped;
/// a present non-numeric value is an error.
fn numeric_values(rows: &[&Row], field: Option<&str>) -> Result<Vec<f64>, ExprError> {
    let field = field.ok_or_else(|| ExprError::Eval("aggregation requires a field".to_string()))?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match lookup_field(row, field) {
            None | Some(Value::Null) => continue,
            Some(v) => match v.as_f64() {
                Some(f) => out.push(f),
                None => {
                    return Err(ExprError::Eval(format!(
                        "non-numeric value for field '{field}': {}",
                        v.display()
                    )))
                }
            },
        }
    }
    Ok(out)
}

/// min/max: numeric when both sides coerce to float, else lexicographic.
fn fold_extreme(rows: &[&Row], field: Option<&str>, want_min: bool) -> Value {
    let field = match field {
        Some(f) => f,
        None => return Value::Null,
    };
    let mut best: Option<Value> = None;
    for row in rows {
        let v = match lookup_field(row, field) {
            None | Some(Value::Null) => continue,
            Some(v) => v.clone(),
        };
        best = Some(match best {
            None => v,
            Some(cur) => {
                let keep_new = match (cur.as_f64(), v.as_f64()) {
                    (Some(a), Some(b)) => {
                        if want_min {
                            b < a
                        } else {
                            b > a
                        }
                    }
                    _ => {
                        let a = cur.display();
                        let b = v.display();
                        if want_min {
                            b < a
                        } else {
                            b > a
                        }
                    }
                };
                if keep_new {
                    v
                } else {
                    cur
                }
            }
        });
    }
    best.unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use livemark_core::value::row;

    fn sources() -> HashMap<String, Vec<Row>> {
        let tasks = vec![
            row([("done", Value::Bool(true)), ("priority", Value::Int(3))]),
            row([("done", Value::Bool(false)), ("priority", Value::Int(1))]),
            row([("done", Value::Bool(true)), ("priority", Value::Int(2))]),
        ];
        let expenses = vec![
            row([("amount", Value::Int(10))]),
            row([("amount", Value::Int(20))]),
        ];
        let scores: Vec<Row> = Vec::new();
        HashMap::from([
            ("tasks".to_string(), tasks),
            ("expenses".to_string(), expenses),
            ("scores".to_string(), scores),
        ])
    }

    fn eval(input: &str) -> Result<Value, ExprError> {
        evaluate(&parse(input).unwrap(), &sources())
    }

    #[test]
    fn count_all() {
        assert_eq!(eval("count(tasks)").unwrap(), Value::Int(3));
    }

    #[test]
    fn count_where_truthy() {
        assert_eq!(eval("count(tasks where done)").unwrap(), Value::Int(2));
        assert_eq!(eval("count(tasks where done = false)").unwrap(), Value::Int(1));
        assert_eq!(eval("count(tasks where not done)").unwrap(), Value::Int(1));
    }

    #[test]
    fn count_where_numeric() {
        assert_eq!(eval("count(tasks where priority >= 2)").unwrap(), Value::Int(2));
        assert_eq!(eval("count(tasks where priority < 2)").unwrap(), Value::Int(1));
    }

    #[test]
    fn sum_amounts() {
        assert_eq!(eval("sum(expenses.amount)").unwrap(), Value::Float(30.0));
    }

    #[test]
    fn avg_of_empty_source_is_zero() {
        assert_eq!(eval("avg(scores.value)").unwrap(), Value::Float(0.0));
    }

    #[test]
    fn min_max_numeric() {
        assert_eq!(eval("min(tasks.priority)").unwrap(), Value::Int(1));
        assert_eq!(eval("max(tasks.priority)").unwrap(), Value::Int(3));
    }

    #[test]
    fn min_max_lexicographic() {
        let rows_by_source = HashMap::from([(
            "names".to_string(),
            vec![
                row([("n", Value::from("banana"))]),
                row([("n", Value::from("apple"))]),
            ],
        )]);
        let expr = parse("min(names.n)").unwrap();
        assert_eq!(
            evaluate(&expr, &rows_by_source).unwrap(),
            Value::Str("apple".into())
        );
    }

    #[test]
    fn sum_skips_nulls_and_rejects_text() {
        let rows_by_source = HashMap::from([(
            "mixed".to_string(),
            vec![
                row([("v", Value::Int(5))]),
                row([("v", Value::Null)]),
                row([("v", Value::from("12"))]),
            ],
        )]);
        let expr = parse("sum(mixed.v)").unwrap();
        assert_eq!(evaluate(&expr, &rows_by_source).unwrap(), Value::Float(17.0));

        let bad = HashMap::from([(
            "mixed".to_string(),
            vec![row([("v", Value::from("not-a-number"))])],
        )]);
        assert!(evaluate(&expr, &bad).is_err());
    }

    #[test]
    fn missing_source_error_message() {
        let err = eval("count(missing)").unwrap_err();
        assert_eq!(err.to_string(), "source 'missing' not found");
    }

    #[test]
    fn case_insensitive_field_lookup() {
        let rows_by_source = HashMap::from([(
            "people".to_string(),
            vec![row([("Name", Value::from("alice"))])],
        )]);
        let expr = parse("count(people where name = alice)").unwrap();
        assert_eq!(evaluate(&expr, &rows_by_source).unwrap(), Value::Int(1));
    }

    #[test]
    fn evaluate_expressions_isolates_errors() {
        let mut exprs = IndexMap::new();
        exprs.insert("e1".to_string(), parse("count(tasks)").unwrap());
        exprs.insert("e4".to_string(), parse("count(missing)").unwrap());

        let results = evaluate_expressions(&exprs, &sources());
        assert_eq!(results["e1"], ExprOutcome::Value(Value::Int(3)));
        assert_eq!(
            results["e4"],
            ExprOutcome::Error("source 'missing' not found".to_string())
        );
    }

    #[test]
    fn outcome_serialization() {
        let ok = ExprOutcome::Value(Value::Int(3));
        assert_eq!(serde_json::to_string(&ok).unwrap(), "3");

        let err = ExprOutcome::Error("source 'missing' not found".into());
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"error":"source 'missing' not found"}"#
        );
    }
}
