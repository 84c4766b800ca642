//! Quantity and ratio values.

use fhirkit_ucum::UcumConverter;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;

/// A decimal value with a UCUM unit.
///
/// Calendar duration keywords (`year`, `months`, …) are stored verbatim as
/// the unit; date arithmetic interprets them, UCUM conversion does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quantity {
    pub value: Decimal,
    pub unit: String,
}

impl Quantity {
    pub fn new(value: Decimal, unit: impl Into<String>) -> Self {
        Quantity {
            value,
            unit: unit.into(),
        }
    }

    /// A unitless quantity (unit `'1'`).
    pub fn dimensionless(value: Decimal) -> Self {
        Quantity::new(value, "1")
    }

    pub fn is_dimensionless(&self) -> bool {
        self.unit.is_empty() || self.unit == "1"
    }

    /// Express this quantity in another unit, if the dimensions agree.
    pub fn converted_to(&self, unit: &str, converter: &UcumConverter) -> Option<Quantity> {
        if self.unit == unit {
            return Some(self.clone());
        }
        let value = converter.convert(self.value, &self.unit, unit).ok()?;
        Some(Quantity::new(value, unit))
    }

    /// Three-valued ordering: converts the right operand to this unit,
    /// `None` when the units are incompatible.
    pub fn compare(&self, other: &Quantity, converter: &UcumConverter) -> Option<Ordering> {
        let other = other.converted_to(&self.unit, converter)?;
        self.value.partial_cmp(&other.value)
    }

    /// Three-valued equality under unit conversion.
    pub fn equals(&self, other: &Quantity, converter: &UcumConverter) -> Option<bool> {
        self.compare(other, converter).map(|o| o == Ordering::Equal)
    }

    /// Sum in this quantity's unit; `None` for incompatible or affine units.
    pub fn add(&self, other: &Quantity, converter: &UcumConverter) -> Option<Quantity> {
        if self.is_affine(converter) || other.is_affine(converter) {
            return None;
        }
        let other = other.converted_to(&self.unit, converter)?;
        Some(Quantity::new(self.value + other.value, self.unit.clone()))
    }

    pub fn subtract(&self, other: &Quantity, converter: &UcumConverter) -> Option<Quantity> {
        if self.is_affine(converter) || other.is_affine(converter) {
            return None;
        }
        let other = other.converted_to(&self.unit, converter)?;
        Some(Quantity::new(self.value - other.value, self.unit.clone()))
    }

    /// Multiply, combining unit dimensions symbolically.
    pub fn multiply(&self, other: &Quantity) -> Quantity {
        let unit = combine_units(&self.unit, &other.unit, '.');
        Quantity::new(self.value * other.value, unit)
    }

    /// Divide, combining unit dimensions symbolically. `None` on zero.
    pub fn divide(&self, other: &Quantity) -> Option<Quantity> {
        if other.value.is_zero() {
            return None;
        }
        let unit = combine_units(&self.unit, &other.unit, '/');
        Some(Quantity::new(self.value / other.value, unit))
    }

    fn is_affine(&self, converter: &UcumConverter) -> bool {
        converter
            .parse(&self.unit)
            .map(|parsed| parsed.is_special)
            .unwrap_or(false)
    }
}

fn combine_units(left: &str, right: &str, op: char) -> String {
    let left_unitless = left.is_empty() || left == "1";
    let right_unitless = right.is_empty() || right == "1";
    match (left_unitless, right_unitless, op) {
        (true, true, _) => "1".to_string(),
        (false, true, _) => left.to_string(),
        (true, false, '.') => right.to_string(),
        (true, false, _) => format!("1/{right}"),
        (false, false, op) => format!("{left}{op}{right}"),
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.value, self.unit)
    }
}

/// A ratio of two quantities, e.g. `5 'mg' : 10 'mL'`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ratio {
    pub numerator: Quantity,
    pub denominator: Quantity,
}

impl Ratio {
    pub fn new(numerator: Quantity, denominator: Quantity) -> Self {
        Ratio {
            numerator,
            denominator,
        }
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn q(value: &str, unit: &str) -> Quantity {
        Quantity::new(Decimal::from_str(value).unwrap(), unit)
    }

    #[test]
    fn test_compare_with_conversion() {
        let converter = UcumConverter::new();
        assert_eq!(
            q("1", "g").compare(&q("500", "mg"), &converter),
            Some(Ordering::Greater)
        );
        assert_eq!(q("1", "g").equals(&q("1000", "mg"), &converter), Some(true));
        assert_eq!(q("1", "g").compare(&q("1", "mL"), &converter), None);
    }

    #[test]
    fn test_add_converts_right_operand() {
        let converter = UcumConverter::new();
        let sum = q("1", "g").add(&q("500", "mg"), &converter).unwrap();
        assert_eq!(sum, q("1.5", "g"));
    }

    #[test]
    fn test_affine_addition_undefined() {
        let converter = UcumConverter::new();
        assert!(q("37", "Cel").add(&q("1", "Cel"), &converter).is_none());
        // but comparison through conversion is fine
        assert_eq!(
            q("37", "Cel").compare(&q("98.6", "[degF]"), &converter),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_multiply_divide_units() {
        let product = q("2", "mg").multiply(&q("3", "1"));
        assert_eq!(product, q("6", "mg"));

        let rate = q("10", "mg").divide(&q("2", "h")).unwrap();
        assert_eq!(rate, q("5", "mg/h"));

        assert!(q("1", "mg").divide(&q("0", "h")).is_none());
    }
}
