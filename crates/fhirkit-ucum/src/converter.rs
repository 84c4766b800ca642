//! UCUM unit parsing and conversion.

use crate::definitions::{
    get_prefixed_unit, resolve_alias, Dimension, DIMENSIONLESS, UNIT_REGISTRY,
};
use crate::error::{Result, UcumError};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

/// A parsed UCUM unit reduced to dimension, factor, and affine offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUnit {
    /// The original unit string
    pub original: String,
    /// Resulting dimension
    pub dimension: Dimension,
    /// Combined conversion factor to the canonical unit
    pub factor: Decimal,
    /// Temperature offset (zero for linear units)
    pub offset: Decimal,
    /// Whether the unit converts affinely
    pub is_special: bool,
}

impl ParsedUnit {
    fn linear(original: impl Into<String>, dimension: Dimension, factor: Decimal) -> Self {
        ParsedUnit {
            original: original.into(),
            dimension,
            factor,
            offset: Decimal::ZERO,
            is_special: false,
        }
    }

    /// Check dimensional compatibility with another parsed unit.
    pub fn is_compatible(&self, other: &ParsedUnit) -> bool {
        self.dimension == other.dimension
    }
}

/// Parser and converter for UCUM units.
///
/// Parse results are cached per converter instance; the cache is behind a
/// mutex so a converter can be shared across threads.
#[derive(Debug, Default)]
pub struct UcumConverter {
    cache: Mutex<HashMap<String, ParsedUnit>>,
}

impl UcumConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a UCUM unit string into dimension and conversion factor.
    pub fn parse(&self, unit_str: &str) -> Result<ParsedUnit> {
        if unit_str.is_empty() {
            return Err(UcumError::unit_parse(unit_str, "empty unit string"));
        }

        if let Some(cached) = self.cache.lock().unwrap().get(unit_str) {
            return Ok(cached.clone());
        }

        let parsed = self.parse_uncached(unit_str)?;
        self.cache
            .lock()
            .unwrap()
            .insert(unit_str.to_string(), parsed.clone());
        Ok(parsed)
    }

    fn parse_uncached(&self, unit_str: &str) -> Result<ParsedUnit> {
        if unit_str == "1" {
            return Ok(ParsedUnit::linear(unit_str, DIMENSIONLESS, Decimal::ONE));
        }

        let normalized = resolve_alias(unit_str);

        if let Some(unit) = UNIT_REGISTRY.get(normalized) {
            return Ok(ParsedUnit {
                original: unit_str.to_string(),
                dimension: unit.dimension,
                factor: unit.factor,
                offset: unit.offset,
                is_special: unit.is_special,
            });
        }

        if let Some((unit, prefix_factor)) = get_prefixed_unit(normalized) {
            return Ok(ParsedUnit {
                original: unit_str.to_string(),
                dimension: unit.dimension,
                factor: unit.factor * prefix_factor,
                offset: unit.offset,
                is_special: unit.is_special,
            });
        }

        self.parse_compound(unit_str)
    }

    /// Parse a compound unit like `mg/dL` or `kg.m/s2`.
    ///
    /// Multiple divisions fold into the denominator: `a/b/c` = `a/(b.c)`.
    fn parse_compound(&self, unit_str: &str) -> Result<ParsedUnit> {
        // A leading slash is an empty numerator: /min is "per minute"
        let (numerator, denominator) = if let Some(rest) = unit_str.strip_prefix('/') {
            (String::new(), split_respecting_brackets(rest, '/').join("."))
        } else {
            let mut parts = split_respecting_brackets(unit_str, '/');
            match parts.len() {
                0 | 1 => (unit_str.to_string(), String::new()),
                _ => (parts.remove(0), parts.join(".")),
            }
        };

        let mut dimension = DIMENSIONLESS;
        let mut factor = Decimal::ONE;

        if !numerator.is_empty() {
            for term in split_respecting_brackets(&numerator, '.') {
                let parsed = self.parse_term(unit_str, &term)?;
                dimension = dimension * parsed.dimension;
                factor *= parsed.factor;
            }
        }

        if !denominator.is_empty() {
            for term in split_respecting_brackets(&denominator, '.') {
                let parsed = self.parse_term(unit_str, &term)?;
                dimension = dimension / parsed.dimension;
                if parsed.factor.is_zero() {
                    return Err(UcumError::Conversion("zero factor in denominator".into()));
                }
                factor /= parsed.factor;
            }
        }

        Ok(ParsedUnit::linear(unit_str, dimension, factor))
    }

    /// Parse a single unit term like `mg`, `m2`, or `s-1`.
    fn parse_term(&self, whole_unit: &str, term: &str) -> Result<ParsedUnit> {
        if term.is_empty() {
            return Ok(ParsedUnit::linear("1", DIMENSIONLESS, Decimal::ONE));
        }

        let (base_term, power) = split_power_suffix(term);
        let base_term = resolve_alias(base_term);

        if let Some((unit, prefix_factor)) = get_prefixed_unit(base_term) {
            if unit.is_special {
                return Err(UcumError::unit_parse(
                    whole_unit,
                    format!("affine unit '{base_term}' cannot appear in a compound unit"),
                ));
            }
            let combined = unit.factor * prefix_factor;
            return Ok(ParsedUnit::linear(
                term,
                unit.dimension.pow(power),
                decimal_powi(combined, power)?,
            ));
        }

        Err(UcumError::unit_parse(
            whole_unit,
            format!("unknown unit term '{base_term}'"),
        ))
    }

    /// Convert a value between two compatible units.
    pub fn convert(&self, value: Decimal, from_unit: &str, to_unit: &str) -> Result<Decimal> {
        let from = self.parse(from_unit)?;
        let to = self.parse(to_unit)?;

        if !from.is_compatible(&to) {
            return Err(UcumError::incompatible(from_unit, to_unit));
        }

        if from.is_special || to.is_special {
            return convert_affine(value, &from, &to);
        }

        if to.factor.is_zero() {
            return Err(UcumError::Conversion("zero target factor".into()));
        }
        Ok(value * from.factor / to.factor)
    }

    /// Check dimensional compatibility of two unit strings.
    ///
    /// Unparseable units are never compatible.
    pub fn is_compatible(&self, unit1: &str, unit2: &str) -> bool {
        match (self.parse(unit1), self.parse(unit2)) {
            (Ok(a), Ok(b)) => a.is_compatible(&b),
            _ => false,
        }
    }
}

/// Affine conversion through the canonical form.
///
/// Canonical = value * factor + offset; target = (canonical - offset) / factor.
fn convert_affine(value: Decimal, from: &ParsedUnit, to: &ParsedUnit) -> Result<Decimal> {
    let canonical = value * from.factor + from.offset;
    if to.factor.is_zero() {
        return Err(UcumError::Conversion("zero target factor".into()));
    }
    Ok((canonical - to.offset) / to.factor)
}

/// Split on a separator at bracket depth zero, so `mm[Hg]` survives intact.
fn split_respecting_brackets(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0u32;

    for ch in input.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if c == separator && depth == 0 => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Split a trailing integer exponent off a term: `m2` -> (`m`, 2), `s-1` -> (`s`, -1).
fn split_power_suffix(term: &str) -> (&str, i32) {
    let digits_start = term
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    let Some(mut start) = digits_start else {
        return (term, 1);
    };
    // Bracketed atoms may end in a digit ([arb'U] does not, but be safe)
    if term[..start].ends_with(']') || start == 0 {
        return (term, 1);
    }
    if term[..start].ends_with('-') {
        start -= 1;
    }
    match term[start..].parse::<i32>() {
        Ok(power) => (&term[..start], power),
        Err(_) => (term, 1),
    }
}

/// Raise a decimal to an integer power, supporting negative exponents.
fn decimal_powi(base: Decimal, power: i32) -> Result<Decimal> {
    if power == 0 {
        return Ok(Decimal::ONE);
    }
    let mut result = Decimal::ONE;
    for _ in 0..power.unsigned_abs() {
        result *= base;
    }
    if power < 0 {
        if result.is_zero() {
            return Err(UcumError::Conversion("zero base with negative power".into()));
        }
        result = Decimal::ONE / result;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_simple_and_prefixed() {
        let converter = UcumConverter::new();
        let mg = converter.parse("mg").unwrap();
        assert_eq!(mg.factor, d("0.001"));
        assert!(!mg.is_special);

        let lb = converter.parse("[lb_av]").unwrap();
        assert_eq!(lb.factor, d("453.59237"));
    }

    #[test]
    fn test_parse_compound() {
        let converter = UcumConverter::new();
        let mg_dl = converter.parse("mg/dL").unwrap();
        let g_l = converter.parse("g/L").unwrap();
        assert!(mg_dl.is_compatible(&g_l));

        let accel = converter.parse("kg.m/s2").unwrap();
        assert_eq!(accel.dimension, crate::definitions::FORCE);
    }

    #[test]
    fn test_parse_power_suffix() {
        assert_eq!(split_power_suffix("m2"), ("m", 2));
        assert_eq!(split_power_suffix("s-1"), ("s", -1));
        assert_eq!(split_power_suffix("mg"), ("mg", 1));
    }

    #[test]
    fn test_parse_unknown_unit() {
        let converter = UcumConverter::new();
        assert!(matches!(
            converter.parse("furlongs"),
            Err(UcumError::UnitParse { .. })
        ));
    }

    #[test]
    fn test_convert_linear() {
        let converter = UcumConverter::new();
        assert_eq!(
            converter.convert(Decimal::ONE, "g", "mg").unwrap(),
            d("1000")
        );
        assert_eq!(
            converter.convert(d("180"), "mg/dL", "mg/L").unwrap(),
            d("1800")
        );
    }

    #[test]
    fn test_convert_affine() {
        let converter = UcumConverter::new();
        let celsius = converter.convert(d("98.6"), "[degF]", "Cel").unwrap();
        assert!((celsius - d("37")).abs() < d("1e-9"));

        let kelvin = converter.convert(d("0"), "Cel", "K").unwrap();
        assert_eq!(kelvin, d("273.15"));
    }

    #[test]
    fn test_convert_incompatible() {
        let converter = UcumConverter::new();
        assert!(matches!(
            converter.convert(Decimal::ONE, "g", "m"),
            Err(UcumError::IncompatibleUnits { .. })
        ));
    }

    #[test]
    fn test_affine_rejected_in_compound() {
        let converter = UcumConverter::new();
        assert!(converter.parse("Cel/s").is_err());
    }

    #[test]
    fn test_cache_round_trip() {
        let converter = UcumConverter::new();
        let first = converter.parse("mm[Hg]").unwrap();
        let second = converter.parse("mm[Hg]").unwrap();
        assert_eq!(first, second);
    }
}
