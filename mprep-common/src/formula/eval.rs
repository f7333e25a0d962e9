//! Formula evaluation
//!
//! Evaluation is pure: one raw row in, one string out. Missing column
//! references resolve to the empty string rather than failing, so a formula
//! written against one manifest template degrades gracefully on another.

use std::collections::BTreeMap;

use super::ast::{Expr, Func};
use super::FormulaError;

pub(crate) fn eval(expr: &Expr, row: &BTreeMap<String, String>) -> Result<String, FormulaError> {
    match expr {
        Expr::Str(s) => Ok(s.clone()),
        Expr::Num(digits) => Ok(digits.clone()),
        Expr::Column(name) => Ok(row.get(name).cloned().unwrap_or_default()),
        Expr::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&eval(part, row)?);
            }
            Ok(out)
        }
        Expr::Call(func, args) => {
            check_arity(*func, args.len())?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, row)?);
            }
            apply(*func, &values)
        }
    }
}

/// Arity check over a whole tree, for validation without a row.
pub(crate) fn check(expr: &Expr) -> Result<(), FormulaError> {
    match expr {
        Expr::Str(_) | Expr::Num(_) | Expr::Column(_) => Ok(()),
        Expr::Concat(parts) => parts.iter().try_for_each(check),
        Expr::Call(func, args) => {
            check_arity(*func, args.len())?;
            args.iter().try_for_each(check)
        }
    }
}

fn check_arity(func: Func, got: usize) -> Result<(), FormulaError> {
    let (min, max) = func.arity();
    let ok = got >= min && max.map_or(true, |m| got <= m);
    if ok {
        return Ok(());
    }
    let expected = match max {
        Some(m) if m == min => format!("exactly {min}"),
        Some(m) => format!("between {min} and {m}"),
        None => format!("at least {min}"),
    };
    Err(FormulaError::ArgCount {
        func: func.name(),
        expected,
        got,
    })
}

fn apply(func: Func, args: &[String]) -> Result<String, FormulaError> {
    match func {
        Func::Upper => Ok(args[0].to_uppercase()),
        Func::Lower => Ok(args[0].to_lowercase()),
        Func::Title => Ok(title_case(&args[0])),
        Func::Trim => Ok(args[0].trim().to_string()),
        Func::Replace => Ok(args[0].replace(args[1].as_str(), args[2].as_str())),
        Func::Concat => Ok(args.concat()),
        Func::Left => {
            let n = parse_count(func, &args[1])?;
            Ok(args[0].chars().take(n).collect())
        }
        Func::Right => {
            let n = parse_count(func, &args[1])?;
            if n == 0 {
                return Ok(String::new());
            }
            let chars: Vec<char> = args[0].chars().collect();
            let start = chars.len().saturating_sub(n);
            Ok(chars[start..].iter().collect())
        }
    }
}

fn parse_count(func: Func, value: &str) -> Result<usize, FormulaError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| FormulaError::InvalidCount {
            func: func.name(),
            value: value.to_string(),
        })
}

/// First letter of each whitespace-separated word uppercased, the rest
/// lowercased.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::{evaluate, validate};
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn title_of_trimmed_description() {
        let r = row(&[("Description", "  used FAN ")]);
        assert_eq!(evaluate("TITLE(TRIM([Description]))", &r).unwrap(), "Used Fan");
    }

    #[test]
    fn upper_and_lower() {
        let r = row(&[("x", "Mixed Case")]);
        assert_eq!(evaluate("UPPER([x])", &r).unwrap(), "MIXED CASE");
        assert_eq!(evaluate("LOWER([x])", &r).unwrap(), "mixed case");
    }

    #[test]
    fn replace_is_literal_not_pattern() {
        let r = row(&[("sku", "A.B.C")]);
        assert_eq!(evaluate(r#"REPLACE([sku], ".", "-")"#, &r).unwrap(), "A-B-C");
        // A regex engine would treat "." as a wildcard; nothing matches literally here.
        let r2 = row(&[("sku", "ABC")]);
        assert_eq!(evaluate(r#"REPLACE([sku], ".", "-")"#, &r2).unwrap(), "ABC");
    }

    #[test]
    fn concat_function_and_plus_operator_agree() {
        let r = row(&[("Brand", "Acme"), ("Model", "T1000")]);
        assert_eq!(
            evaluate(r#"CONCAT([Brand], " ", [Model])"#, &r).unwrap(),
            "Acme T1000"
        );
        assert_eq!(
            evaluate(r#"[Brand] + " " + [Model]"#, &r).unwrap(),
            "Acme T1000"
        );
    }

    #[test]
    fn left_and_right_count_characters() {
        let r = row(&[("x", "abcdef")]);
        assert_eq!(evaluate(r#"LEFT([x], "3")"#, &r).unwrap(), "abc");
        assert_eq!(evaluate("RIGHT([x], 2)", &r).unwrap(), "ef");
        assert_eq!(evaluate("LEFT([x], 99)", &r).unwrap(), "abcdef");
    }

    #[test]
    fn right_with_zero_count_is_empty() {
        let r = row(&[("x", "abcdef")]);
        assert_eq!(evaluate("RIGHT([x], 0)", &r).unwrap(), "");
    }

    #[test]
    fn left_right_are_char_based_not_byte_based() {
        let r = row(&[("x", "héllo")]);
        assert_eq!(evaluate("LEFT([x], 2)", &r).unwrap(), "hé");
        assert_eq!(evaluate("RIGHT([x], 4)", &r).unwrap(), "éllo");
    }

    #[test]
    fn non_numeric_count_is_an_error() {
        let r = row(&[("x", "abc"), ("n", "two")]);
        let err = evaluate("LEFT([x], [n])", &r).unwrap_err();
        assert!(matches!(err, FormulaError::InvalidCount { func: "LEFT", .. }));
    }

    #[test]
    fn missing_column_resolves_to_empty() {
        let r = row(&[]);
        assert_eq!(evaluate("UPPER([Nope])", &r).unwrap(), "");
        assert_eq!(evaluate("[Nope]", &r).unwrap(), "");
    }

    #[test]
    fn empty_formula_evaluates_to_empty() {
        let r = row(&[("x", "y")]);
        assert_eq!(evaluate("", &r).unwrap(), "");
        assert_eq!(evaluate("   ", &r).unwrap(), "");
    }

    #[test]
    fn number_literal_keeps_its_digits() {
        let r = row(&[]);
        assert_eq!(evaluate(r#"CONCAT("lot-", 007)"#, &r).unwrap(), "lot-007");
    }

    #[test]
    fn arity_errors_name_the_function() {
        let r = row(&[("x", "y")]);
        let err = evaluate("TRIM([x], [x])", &r).unwrap_err();
        match err {
            FormulaError::ArgCount { func, got, .. } => {
                assert_eq!(func, "TRIM");
                assert_eq!(got, 2);
            }
            other => panic!("expected arg count error, got {other:?}"),
        }
        assert!(evaluate("CONCAT()", &r).is_err());
        assert!(evaluate(r#"REPLACE([x], "a")"#, &r).is_err());
    }

    #[test]
    fn validate_accepts_what_evaluate_accepts() {
        assert!(validate("TITLE(TRIM([Description]))").is_ok());
        assert!(validate("").is_ok());
        assert!(validate(r#"[a] + LEFT([b], 2)"#).is_ok());
    }

    #[test]
    fn validate_catches_arity_without_a_row() {
        assert!(matches!(
            validate("UPPER([a], [b])"),
            Err(FormulaError::ArgCount { .. })
        ));
        assert!(matches!(
            validate("CONCAT(UPPER())"),
            Err(FormulaError::ArgCount { .. })
        ));
    }

    #[test]
    fn title_case_handles_interior_runs_of_space() {
        assert_eq!(title_case("two  words"), "Two  Words");
        assert_eq!(title_case(""), "");
    }
}
