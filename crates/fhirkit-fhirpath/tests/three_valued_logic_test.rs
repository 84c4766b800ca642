//! The Kleene truth tables, exercised through the full parse-and-evaluate
//! path.

use fhirkit_fhirpath::FhirPath;

/// Render an operand for embedding into an expression: true, false, or the
/// empty collection.
fn operand(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "true",
        Some(false) => "false",
        None => "{}",
    }
}

fn eval(expression: &str) -> Option<bool> {
    FhirPath::new().evaluate_boolean(expression, None).unwrap()
}

#[test]
fn test_and_table() {
    let table = [
        (Some(true), Some(true), Some(true)),
        (Some(true), Some(false), Some(false)),
        (Some(false), Some(false), Some(false)),
        (Some(false), None, Some(false)),
        (Some(true), None, None),
        (None, None, None),
    ];
    for (left, right, expected) in table {
        let expr = format!("{} and {}", operand(left), operand(right));
        assert_eq!(eval(&expr), expected, "{expr}");
        let flipped = format!("{} and {}", operand(right), operand(left));
        assert_eq!(eval(&flipped), expected, "{flipped}");
    }
}

#[test]
fn test_or_table() {
    let table = [
        (Some(true), Some(true), Some(true)),
        (Some(true), Some(false), Some(true)),
        (Some(false), Some(false), Some(false)),
        (Some(true), None, Some(true)),
        (Some(false), None, None),
        (None, None, None),
    ];
    for (left, right, expected) in table {
        let expr = format!("{} or {}", operand(left), operand(right));
        assert_eq!(eval(&expr), expected, "{expr}");
    }
}

#[test]
fn test_xor_propagates_unknown() {
    assert_eq!(eval("true xor false"), Some(true));
    assert_eq!(eval("true xor true"), Some(false));
    assert_eq!(eval("true xor {}"), None);
    assert_eq!(eval("{} xor false"), None);
}

#[test]
fn test_implies_table() {
    let table = [
        (Some(false), None, Some(true)),
        (None, Some(true), Some(true)),
        (Some(true), Some(false), Some(false)),
        (Some(true), None, None),
        (None, Some(false), None),
        (None, None, None),
    ];
    for (left, right, expected) in table {
        let expr = format!("{} implies {}", operand(left), operand(right));
        assert_eq!(eval(&expr), expected, "{expr}");
    }
}

#[test]
fn test_and_does_not_short_circuit_on_true() {
    // true and ({} = 1): the right side is empty, so the whole expression is
    // empty rather than true.
    assert_eq!(eval("true and ({} = 1)"), None);
}

#[test]
fn test_not_function() {
    assert_eq!(eval("true.not()"), Some(false));
    assert_eq!(eval("false.not()"), Some(true));
    assert_eq!(eval("{}.not()"), None);
}
