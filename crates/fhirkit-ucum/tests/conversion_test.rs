//! Integration tests for UCUM parsing and conversion round-trips.

use fhirkit_ucum::{UcumConverter, UcumError};
use rust_decimal::Decimal;
use std::str::FromStr;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[test]
fn test_clinical_conversions() {
    let converter = UcumConverter::new();

    let cases = [
        ("1", "g", "mg", "1000"),
        ("2.5", "kg", "g", "2500"),
        ("180", "mg/dL", "mg/L", "1800"),
        ("1", "L", "mL", "1000"),
        ("60", "min", "h", "1"),
        ("1", "[lb_av]", "[oz_av]", "16"),
    ];

    for (value, from, to, expected) in cases {
        let result = converter.convert(d(value), from, to).unwrap();
        assert_eq!(result, d(expected), "{value} {from} -> {to}");
    }
}

#[test]
fn test_temperature_round_trip() {
    let converter = UcumConverter::new();
    let tolerance = d("1e-9");

    let celsius = converter.convert(d("98.6"), "[degF]", "Cel").unwrap();
    assert!((celsius - d("37")).abs() < tolerance);

    let back = converter.convert(celsius, "Cel", "[degF]").unwrap();
    assert!((back - d("98.6")).abs() < tolerance);
}

#[test]
fn test_round_trip_preserves_value() {
    let converter = UcumConverter::new();
    let tolerance = d("1e-18");

    for (from, to) in [("g", "mg"), ("m", "[in_i]"), ("mg/dL", "g/L"), ("h", "s")] {
        let x = d("12.345");
        let there = converter.convert(x, from, to).unwrap();
        let back = converter.convert(there, to, from).unwrap();
        assert!((back - x).abs() < tolerance, "{from} <-> {to}");
    }
}

#[test]
fn test_alias_and_bracket_units() {
    let converter = UcumConverter::new();

    // mcg is an alias for ug
    let mg = converter.convert(d("1000"), "mcg", "mg").unwrap();
    assert_eq!(mg, d("1"));

    // cc aliases to mL
    assert!(converter.is_compatible("cc", "L"));

    // bracket atoms survive compound parsing
    assert!(converter.is_compatible("mm[Hg]", "Pa"));
}

#[test]
fn test_incompatible_dimensions_error() {
    let converter = UcumConverter::new();
    let err = converter.convert(Decimal::ONE, "mg", "mL").unwrap_err();
    assert!(matches!(err, UcumError::IncompatibleUnits { .. }));
}

#[test]
fn test_dimensionless_percent() {
    let converter = UcumConverter::new();
    let fraction = converter.convert(d("50"), "%", "1").unwrap();
    assert_eq!(fraction, d("0.5"));
}
