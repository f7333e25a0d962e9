//! Formula engine tests against realistic manifest expressions
//!
//! Exercises the formulas an operator would actually write while mapping a
//! vendor CSV onto the standard columns, end to end through parse and
//! evaluate.

use std::collections::BTreeMap;

use mprep_common::formula::{evaluate, validate, FormulaError};

fn liquidation_row() -> BTreeMap<String, String> {
    [
        ("Item Description", "  LASKO 20\" box FAN (tested) "),
        ("Brand Name", "LASKO"),
        ("Model No", "B20200"),
        ("MSRP", "$29.99"),
        ("UPC Code", "046013346070"),
        ("Qty", "3"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[test]
fn description_formula_from_the_wild() {
    let row = liquidation_row();
    assert_eq!(
        evaluate("TITLE(TRIM([Item Description]))", &row).unwrap(),
        "Lasko 20\" Box Fan (tested)"
    );
}

#[test]
fn brand_model_concat_styles_agree() {
    let row = liquidation_row();
    let with_func = evaluate(r#"CONCAT(TITLE([Brand Name]), " ", UPPER([Model No]))"#, &row);
    let with_plus = evaluate(r#"TITLE([Brand Name]) + " " + UPPER([Model No])"#, &row);
    assert_eq!(with_func.unwrap(), "Lasko B20200");
    assert_eq!(with_plus.unwrap(), "Lasko B20200");
}

#[test]
fn retail_value_passthrough_with_cleanup() {
    let row = liquidation_row();
    assert_eq!(
        evaluate(r#"REPLACE(TRIM([MSRP]), "$", "")"#, &row).unwrap(),
        "29.99"
    );
}

#[test]
fn nested_replace_chain() {
    let mut row = BTreeMap::new();
    row.insert("cond".to_string(), "NEW-OPEN-BOX".to_string());
    assert_eq!(
        evaluate(
            r#"TITLE(REPLACE(REPLACE([cond], "-", " "), "NEW", "new"))"#,
            &row
        )
        .unwrap(),
        "New Open Box"
    );
}

#[test]
fn upc_check_digit_slice() {
    let row = liquidation_row();
    assert_eq!(evaluate("RIGHT([UPC Code], 1)", &row).unwrap(), "0");
    assert_eq!(evaluate("LEFT([UPC Code], 6)", &row).unwrap(), "046013");
}

#[test]
fn formula_against_a_template_it_was_not_written_for() {
    // Columns from a different vendor: every reference falls back to "".
    let other: BTreeMap<String, String> = BTreeMap::new();
    assert_eq!(
        evaluate("TITLE(TRIM([Item Description]))", &other).unwrap(),
        ""
    );
    assert_eq!(
        evaluate(r#"[Brand Name] + " " + [Model No]"#, &other).unwrap(),
        " "
    );
}

#[test]
fn grouping_controls_evaluation_shape() {
    let row = liquidation_row();
    assert_eq!(
        evaluate(r#"UPPER(([Brand Name] + " " + [Model No]))"#, &row).unwrap(),
        "LASKO B20200"
    );
}

#[test]
fn typical_typos_fail_validation() {
    // Missing closing bracket
    assert!(matches!(
        validate("TRIM([Description)"),
        Err(FormulaError::Syntax(_))
    ));
    // Unbalanced parens
    assert!(matches!(
        validate("TITLE(TRIM([x])"),
        Err(FormulaError::Syntax(_))
    ));
    // Lowercase function names are not functions
    assert!(validate("trim([x])").is_err());
    // Wrong arity is caught before any row is touched
    assert!(matches!(
        validate(r#"REPLACE([x], "a", "b", "c")"#),
        Err(FormulaError::ArgCount { .. })
    ));
}

#[test]
fn evaluation_is_deterministic() {
    let row = liquidation_row();
    let first = evaluate("TITLE(TRIM([Item Description]))", &row).unwrap();
    for _ in 0..10 {
        assert_eq!(
            evaluate("TITLE(TRIM([Item Description]))", &row).unwrap(),
            first
        );
    }
}
