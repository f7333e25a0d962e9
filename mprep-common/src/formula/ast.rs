//! Formula expression tree
//!
//! Expressions are parsed once and evaluated per manifest row, so bulk
//! preview does not re-parse the same formula for every row.

/// Built-in transform functions. Names are matched case-sensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Upper,
    Lower,
    Title,
    Trim,
    Replace,
    Concat,
    Left,
    Right,
}

impl Func {
    /// Canonical name as written in formulas.
    pub fn name(&self) -> &'static str {
        match self {
            Func::Upper => "UPPER",
            Func::Lower => "LOWER",
            Func::Title => "TITLE",
            Func::Trim => "TRIM",
            Func::Replace => "REPLACE",
            Func::Concat => "CONCAT",
            Func::Left => "LEFT",
            Func::Right => "RIGHT",
        }
    }

    /// Accepted argument count as (min, max). `None` max means unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Func::Upper | Func::Lower | Func::Title | Func::Trim => (1, Some(1)),
            Func::Replace => (3, Some(3)),
            Func::Concat => (1, None),
            Func::Left | Func::Right => (2, Some(2)),
        }
    }
}

/// A parsed formula expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Quoted string literal, escapes already resolved.
    Str(String),
    /// Integer literal. Digits are kept verbatim so `007` stays `007`.
    Num(String),
    /// `[Column Name]` reference into the raw row.
    Column(String),
    /// `a + b + c` concatenation chain.
    Concat(Vec<Expr>),
    /// `FUNC(arg, ...)` call.
    Call(Func, Vec<Expr>),
}
