//! Inline aggregation expressions.
//!
//! A backticked span whose content begins with `=` carries one of these
//! expressions; the body is parsed here and evaluated against the live
//! sources on a page, then pushed to clients as named result slots.
//!
//! Grammar: `func(source[.field] [where <clause>])` with funcs
//! count/sum/avg/min/max. The where-clause grammar is shared with block
//! filters.

pub mod evaluator;
pub mod parser;

use thiserror::Error;

pub use evaluator::{evaluate, evaluate_expressions, ExprOutcome};
pub use parser::{parse, parse_value, parse_where, AggFunc, CmpOp, Expression, WhereClause};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("source '{0}' not found")]
    SourceNotFound(String),

    #[error("{0}")]
    Eval(String),
}
