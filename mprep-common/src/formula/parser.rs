//! Formula grammar
//!
//! ```text
//! expression := concat
//! concat     := primary ( '+' primary )*
//! primary    := STRING | NUMBER | COLREF | call | '(' concat ')'
//! call       := FUNC '(' [ concat (',' concat)* ] ')'
//! STRING     := '"' (escaped | [^"\])* '"'     escapes: \" and \\
//! NUMBER     := [0-9]+
//! COLREF     := '[' [^\]]+ ']'
//! ```
//!
//! Whitespace between tokens is insignificant. The whole input must parse;
//! trailing characters are a syntax error.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while1},
    character::complete::{char, digit1, multispace0, none_of},
    combinator::{all_consuming, map, value},
    error::{context, convert_error, VerboseError},
    multi::{many0, separated_list0},
    sequence::{delimited, preceded, terminated},
    IResult,
};

use super::ast::{Expr, Func};
use super::FormulaError;

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Parse a complete formula. Empty or whitespace-only input is the empty
/// string literal, which evaluates to `""`.
pub(crate) fn parse(input: &str) -> Result<Expr, FormulaError> {
    if input.trim().is_empty() {
        return Ok(Expr::Str(String::new()));
    }
    match all_consuming(terminated(concat_expr, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(FormulaError::Syntax(convert_error(input, e)))
        }
        Err(nom::Err::Incomplete(_)) => {
            Err(FormulaError::Syntax("unexpected end of input".to_string()))
        }
    }
}

fn sym(c: char) -> impl FnMut(&str) -> PResult<'_, char> {
    move |input| preceded(multispace0, char(c))(input)
}

fn concat_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = primary(input)?;
    let (input, rest) = many0(preceded(sym('+'), primary))(input)?;
    if rest.is_empty() {
        Ok((input, first))
    } else {
        let mut parts = Vec::with_capacity(rest.len() + 1);
        parts.push(first);
        parts.extend(rest);
        Ok((input, Expr::Concat(parts)))
    }
}

fn primary(input: &str) -> PResult<'_, Expr> {
    preceded(
        multispace0,
        alt((
            string_literal,
            number_literal,
            column_ref,
            call,
            delimited(char('('), concat_expr, sym(')')),
        )),
    )(input)
}

fn string_literal(input: &str) -> PResult<'_, Expr> {
    let body = escaped_transform(
        none_of("\"\\"),
        '\\',
        alt((value('"', char('"')), value('\\', char('\\')))),
    );
    map(
        context("string literal", delimited(char('"'), body, char('"'))),
        Expr::Str,
    )(input)
}

fn number_literal(input: &str) -> PResult<'_, Expr> {
    map(digit1, |digits: &str| Expr::Num(digits.to_string()))(input)
}

fn column_ref(input: &str) -> PResult<'_, Expr> {
    map(
        context(
            "column reference",
            delimited(char('['), take_while1(|c| c != ']'), char(']')),
        ),
        |name: &str| Expr::Column(name.to_string()),
    )(input)
}

fn function_name(input: &str) -> PResult<'_, Func> {
    alt((
        value(Func::Upper, tag("UPPER")),
        value(Func::Lower, tag("LOWER")),
        value(Func::Title, tag("TITLE")),
        value(Func::Trim, tag("TRIM")),
        value(Func::Replace, tag("REPLACE")),
        value(Func::Concat, tag("CONCAT")),
        value(Func::Left, tag("LEFT")),
        value(Func::Right, tag("RIGHT")),
    ))(input)
}

fn call(input: &str) -> PResult<'_, Expr> {
    let (input, func) = function_name(input)?;
    let (input, args) = context(
        "argument list",
        delimited(
            sym('('),
            separated_list0(sym(','), concat_expr),
            sym(')'),
        ),
    )(input)?;
    Ok((input, Expr::Call(func, args)))
}
