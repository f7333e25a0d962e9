//! Column-transform formula engine
//!
//! Small expression language used during manifest standardization: each
//! standard target column is produced by one formula evaluated against the
//! raw row, e.g. `TITLE(TRIM([Description]))` or
//! `[Brand] + " " + [Model]`.
//!
//! Failures are ordinary values. Bulk preview embeds the error message in
//! the offending cell and keeps going, so one bad formula never takes down
//! a preview of twenty rows.

use std::collections::BTreeMap;

use thiserror::Error;

mod ast;
mod eval;
mod parser;

pub use ast::{Expr, Func};

/// Error raised while parsing or evaluating a formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    /// The expression does not match the grammar. The message carries the
    /// rendered position information.
    #[error("Formula syntax error:\n{0}")]
    Syntax(String),

    /// A function was called with the wrong number of arguments.
    #[error("{func}() requires {expected} argument(s), got {got}")]
    ArgCount {
        func: &'static str,
        expected: String,
        got: usize,
    },

    /// LEFT/RIGHT count argument did not evaluate to a whole number.
    #[error("{func}() requires a whole-number count, got '{value}'")]
    InvalidCount { func: &'static str, value: String },
}

/// Parse a formula into an expression tree. Useful when the same formula
/// will be evaluated against many rows.
pub fn parse(formula: &str) -> Result<Expr, FormulaError> {
    parser::parse(formula)
}

/// Evaluate a parsed expression against one raw row (header -> cell value).
pub fn eval_parsed(expr: &Expr, row: &BTreeMap<String, String>) -> Result<String, FormulaError> {
    eval::eval(expr, row)
}

/// Parse and evaluate in one step.
pub fn evaluate(formula: &str, row: &BTreeMap<String, String>) -> Result<String, FormulaError> {
    let expr = parser::parse(formula)?;
    eval::eval(&expr, row)
}

/// Check a formula without evaluating it: grammar plus argument counts.
/// Used for interactive feedback before anything is committed.
pub fn validate(formula: &str) -> Result<(), FormulaError> {
    let expr = parser::parse(formula)?;
    eval::check(&expr)
}
