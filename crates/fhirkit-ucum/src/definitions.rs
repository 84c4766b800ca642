//! UCUM unit definitions.
//!
//! A subset of the UCUM specification covering the units that appear in
//! clinical data: SI base and derived units, customary US units, pressure,
//! temperature scales, and the dimensionless clinical atoms. Per UCUM the
//! canonical mass unit is the gram, not the kilogram.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Div, Mul};
use std::str::FromStr;

/// Exponent vector over the seven UCUM base dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension {
    pub length: i8,
    pub mass: i8,
    pub time: i8,
    pub temperature: i8,
    pub amount: i8,
    pub current: i8,
    pub luminosity: i8,
}

impl Dimension {
    pub const DIMENSIONLESS: Dimension = Dimension {
        length: 0,
        mass: 0,
        time: 0,
        temperature: 0,
        amount: 0,
        current: 0,
        luminosity: 0,
    };

    pub const fn base(
        length: i8,
        mass: i8,
        time: i8,
        temperature: i8,
        amount: i8,
        current: i8,
        luminosity: i8,
    ) -> Self {
        Dimension {
            length,
            mass,
            time,
            temperature,
            amount,
            current,
            luminosity,
        }
    }

    pub fn pow(self, power: i32) -> Self {
        let p = power as i8;
        Dimension {
            length: self.length * p,
            mass: self.mass * p,
            time: self.time * p,
            temperature: self.temperature * p,
            amount: self.amount * p,
            current: self.current * p,
            luminosity: self.luminosity * p,
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        *self == Self::DIMENSIONLESS
    }
}

impl Mul for Dimension {
    type Output = Dimension;

    fn mul(self, other: Dimension) -> Dimension {
        Dimension {
            length: self.length + other.length,
            mass: self.mass + other.mass,
            time: self.time + other.time,
            temperature: self.temperature + other.temperature,
            amount: self.amount + other.amount,
            current: self.current + other.current,
            luminosity: self.luminosity + other.luminosity,
        }
    }
}

impl Div for Dimension {
    type Output = Dimension;

    fn div(self, other: Dimension) -> Dimension {
        Dimension {
            length: self.length - other.length,
            mass: self.mass - other.mass,
            time: self.time - other.time,
            temperature: self.temperature - other.temperature,
            amount: self.amount - other.amount,
            current: self.current - other.current,
            luminosity: self.luminosity - other.luminosity,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: [(&str, i8); 7] = [
            ("L", self.length),
            ("M", self.mass),
            ("T", self.time),
            ("K", self.temperature),
            ("N", self.amount),
            ("I", self.current),
            ("J", self.luminosity),
        ];
        let mut wrote = false;
        for (symbol, exp) in parts {
            if exp != 0 {
                if wrote {
                    write!(f, ".")?;
                }
                write!(f, "{symbol}{exp}")?;
                wrote = true;
            }
        }
        if !wrote {
            write!(f, "1")?;
        }
        Ok(())
    }
}

pub const DIMENSIONLESS: Dimension = Dimension::DIMENSIONLESS;
pub const LENGTH: Dimension = Dimension::base(1, 0, 0, 0, 0, 0, 0);
pub const MASS: Dimension = Dimension::base(0, 1, 0, 0, 0, 0, 0);
pub const TIME: Dimension = Dimension::base(0, 0, 1, 0, 0, 0, 0);
pub const TEMPERATURE: Dimension = Dimension::base(0, 0, 0, 1, 0, 0, 0);
pub const AMOUNT: Dimension = Dimension::base(0, 0, 0, 0, 1, 0, 0);
pub const CURRENT: Dimension = Dimension::base(0, 0, 0, 0, 0, 1, 0);
pub const LUMINOSITY: Dimension = Dimension::base(0, 0, 0, 0, 0, 0, 1);

pub const AREA: Dimension = Dimension::base(2, 0, 0, 0, 0, 0, 0);
pub const VOLUME: Dimension = Dimension::base(3, 0, 0, 0, 0, 0, 0);
pub const FORCE: Dimension = Dimension::base(1, 1, -2, 0, 0, 0, 0);
pub const ENERGY: Dimension = Dimension::base(2, 1, -2, 0, 0, 0, 0);
pub const PRESSURE: Dimension = Dimension::base(-1, 1, -2, 0, 0, 0, 0);
pub const FREQUENCY: Dimension = Dimension::base(0, 0, -1, 0, 0, 0, 0);

/// Definition of a UCUM unit atom.
#[derive(Debug, Clone)]
pub struct UnitDefinition {
    /// UCUM code (e.g. `g`, `mm[Hg]`, `[lb_av]`)
    pub code: &'static str,
    /// Human-readable name
    pub name: &'static str,
    /// Dimensional analysis
    pub dimension: Dimension,
    /// Conversion factor to the canonical unit of the dimension
    pub factor: Decimal,
    /// Offset for affine (temperature) conversions
    pub offset: Decimal,
    /// Whether SI prefixes apply
    pub is_metric: bool,
    /// Whether the unit converts affinely
    pub is_special: bool,
}

impl UnitDefinition {
    fn linear(code: &'static str, name: &'static str, dimension: Dimension, factor: &str) -> Self {
        UnitDefinition {
            code,
            name,
            dimension,
            factor: dec(factor),
            offset: Decimal::ZERO,
            is_metric: true,
            is_special: false,
        }
    }

    fn nonmetric(
        code: &'static str,
        name: &'static str,
        dimension: Dimension,
        factor: &str,
    ) -> Self {
        UnitDefinition {
            is_metric: false,
            ..Self::linear(code, name, dimension, factor)
        }
    }
}

// Registry constants are vetted literals; a parse failure here is a
// programming error, not an input error.
fn dec(s: &str) -> Decimal {
    if s.contains('e') || s.contains('E') {
        Decimal::from_scientific(s).unwrap()
    } else {
        Decimal::from_str(s).unwrap()
    }
}

/// SI prefixes with their factors. `da` must be matched before `d`.
pub static SI_PREFIXES: Lazy<Vec<(&'static str, Decimal)>> = Lazy::new(|| {
    vec![
        ("da", dec("1e1")),
        ("Y", dec("1e24")),
        ("Z", dec("1e21")),
        ("E", dec("1e18")),
        ("P", dec("1e15")),
        ("T", dec("1e12")),
        ("G", dec("1e9")),
        ("M", dec("1e6")),
        ("k", dec("1e3")),
        ("h", dec("1e2")),
        ("d", dec("1e-1")),
        ("c", dec("1e-2")),
        ("m", dec("1e-3")),
        ("u", dec("1e-6")),
        ("n", dec("1e-9")),
        ("p", dec("1e-12")),
        ("f", dec("1e-15")),
        ("a", dec("1e-18")),
        ("z", dec("1e-21")),
        ("y", dec("1e-24")),
    ]
});

/// Complete unit registry, keyed by UCUM code.
pub static UNIT_REGISTRY: Lazy<HashMap<&'static str, UnitDefinition>> = Lazy::new(|| {
    let mut units: Vec<UnitDefinition> = vec![
        // Base units
        UnitDefinition::linear("m", "meter", LENGTH, "1"),
        UnitDefinition::linear("g", "gram", MASS, "1"),
        UnitDefinition::linear("s", "second", TIME, "1"),
        UnitDefinition::linear("K", "Kelvin", TEMPERATURE, "1"),
        UnitDefinition::linear("mol", "mole", AMOUNT, "1"),
        UnitDefinition::linear("A", "Ampere", CURRENT, "1"),
        UnitDefinition::linear("cd", "candela", LUMINOSITY, "1"),
        UnitDefinition::nonmetric("1", "unity", DIMENSIONLESS, "1"),
        UnitDefinition::nonmetric("%", "percent", DIMENSIONLESS, "0.01"),
        // Derived metric units
        UnitDefinition::linear("L", "liter", VOLUME, "1e-3"),
        UnitDefinition::linear("l", "liter", VOLUME, "1e-3"),
        // 1 N = 1 kg.m/s2 = 1000 g.m/s2
        UnitDefinition::linear("N", "Newton", FORCE, "1000"),
        UnitDefinition::linear("Pa", "Pascal", PRESSURE, "1000"),
        UnitDefinition::linear("bar", "bar", PRESSURE, "1e8"),
        UnitDefinition::linear("J", "Joule", ENERGY, "1000"),
        UnitDefinition::linear("cal", "calorie", ENERGY, "4184"),
        UnitDefinition::linear("Hz", "Hertz", FREQUENCY, "1"),
        UnitDefinition::linear("eq", "equivalent", AMOUNT, "1"),
        UnitDefinition::linear("osm", "osmole", AMOUNT, "1"),
        UnitDefinition::linear("rad", "radian", DIMENSIONLESS, "1"),
        UnitDefinition::linear("deg", "degree", DIMENSIONLESS, "0.0174532925199433"),
        // Time units (non-metric): UCUM mean month and Julian year
        UnitDefinition::nonmetric("min", "minute", TIME, "60"),
        UnitDefinition::nonmetric("h", "hour", TIME, "3600"),
        UnitDefinition::nonmetric("d", "day", TIME, "86400"),
        UnitDefinition::nonmetric("wk", "week", TIME, "604800"),
        UnitDefinition::nonmetric("mo", "month", TIME, "2629746"),
        UnitDefinition::nonmetric("a", "year", TIME, "31557600"),
        // US customary mass
        UnitDefinition::nonmetric("[lb_av]", "pound", MASS, "453.59237"),
        UnitDefinition::nonmetric("[oz_av]", "ounce", MASS, "28.349523125"),
        UnitDefinition::nonmetric("[gr]", "grain", MASS, "0.06479891"),
        UnitDefinition::nonmetric("[dr_av]", "dram", MASS, "1.7718451953125"),
        UnitDefinition::nonmetric("[stone_av]", "stone", MASS, "6350.29318"),
        // US customary length
        UnitDefinition::nonmetric("[in_i]", "inch", LENGTH, "0.0254"),
        UnitDefinition::nonmetric("[ft_i]", "foot", LENGTH, "0.3048"),
        UnitDefinition::nonmetric("[yd_i]", "yard", LENGTH, "0.9144"),
        UnitDefinition::nonmetric("[mi_i]", "mile", LENGTH, "1609.344"),
        // US customary volume
        UnitDefinition::nonmetric("[gal_us]", "US gallon", VOLUME, "0.003785411784"),
        UnitDefinition::nonmetric("[qt_us]", "US quart", VOLUME, "0.000946352946"),
        UnitDefinition::nonmetric("[pt_us]", "US pint", VOLUME, "0.000473176473"),
        UnitDefinition::nonmetric("[foz_us]", "US fluid ounce", VOLUME, "0.0000295735295625"),
        UnitDefinition::nonmetric("[tbs_us]", "US tablespoon", VOLUME, "0.00001478676478125"),
        UnitDefinition::nonmetric("[tsp_us]", "US teaspoon", VOLUME, "0.00000492892159375"),
        UnitDefinition::nonmetric("[cup_us]", "US cup", VOLUME, "0.0002365882365"),
        // Pressure
        UnitDefinition::nonmetric("mm[Hg]", "millimeter of mercury", PRESSURE, "133322.387415"),
        UnitDefinition::nonmetric("[psi]", "pound per square inch", PRESSURE, "6894757.29"),
        // Clinical arbitrary units
        UnitDefinition::nonmetric("[IU]", "international unit", DIMENSIONLESS, "1"),
        UnitDefinition::nonmetric("[iU]", "international unit", DIMENSIONLESS, "1"),
        UnitDefinition::nonmetric("[arb'U]", "arbitrary unit", DIMENSIONLESS, "1"),
        UnitDefinition::nonmetric("[USP'U]", "USP unit", DIMENSIONLESS, "1"),
        UnitDefinition::nonmetric("[pH]", "pH", DIMENSIONLESS, "1"),
    ];

    // Affine temperature scales
    units.push(UnitDefinition {
        code: "Cel",
        name: "degree Celsius",
        dimension: TEMPERATURE,
        factor: Decimal::ONE,
        offset: dec("273.15"),
        is_metric: false,
        is_special: true,
    });
    let five_ninths = Decimal::from(5) / Decimal::from(9);
    units.push(UnitDefinition {
        code: "[degF]",
        name: "degree Fahrenheit",
        dimension: TEMPERATURE,
        factor: five_ninths,
        offset: dec("459.67") * five_ninths,
        is_metric: false,
        is_special: true,
    });

    units.into_iter().map(|u| (u.code, u)).collect()
});

/// Common aliases applied before parsing.
pub static UNIT_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("mcg", "ug"),
        ("sec", "s"),
        ("hr", "h"),
        ("yr", "a"),
        ("cc", "mL"),
        ("lbs", "[lb_av]"),
        ("lb", "[lb_av]"),
        ("oz", "[oz_av]"),
        ("in", "[in_i]"),
        ("ft", "[ft_i]"),
        ("mi", "[mi_i]"),
        ("gal", "[gal_us]"),
        ("degC", "Cel"),
        ("degF", "[degF]"),
        ("celsius", "Cel"),
        ("fahrenheit", "[degF]"),
        ("meter", "m"),
        ("gram", "g"),
        ("second", "s"),
        ("liter", "L"),
        ("litre", "L"),
    ])
});

/// Resolve an alias to its UCUM code, or return the input unchanged.
pub fn resolve_alias(code: &str) -> &str {
    UNIT_ALIASES.get(code).copied().unwrap_or(code)
}

/// Try to resolve a code as a (possibly prefixed) unit atom.
///
/// Returns the atom definition and the prefix factor. Prefixes only apply
/// to metric atoms, so `min` resolves as the minute atom rather than
/// milli-`in`.
pub fn get_prefixed_unit(code: &str) -> Option<(&'static UnitDefinition, Decimal)> {
    let code = resolve_alias(code);

    if let Some(unit) = UNIT_REGISTRY.get(code) {
        return Some((unit, Decimal::ONE));
    }

    for (prefix, factor) in SI_PREFIXES.iter() {
        if let Some(base_code) = code.strip_prefix(prefix) {
            if base_code.is_empty() {
                continue;
            }
            if let Some(base_unit) = UNIT_REGISTRY.get(base_code) {
                if base_unit.is_metric {
                    return Some((base_unit, *factor));
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_algebra() {
        assert_eq!(LENGTH * LENGTH, AREA);
        assert_eq!(VOLUME / LENGTH, AREA);
        assert_eq!(LENGTH.pow(3), VOLUME);
        assert!(DIMENSIONLESS.is_dimensionless());
        assert!(!(MASS / TIME).is_dimensionless());
    }

    #[test]
    fn test_prefixed_lookup() {
        let (unit, factor) = get_prefixed_unit("mg").unwrap();
        assert_eq!(unit.code, "g");
        assert_eq!(factor, dec("1e-3"));

        // 'min' is the minute atom, not milli-inch
        let (unit, factor) = get_prefixed_unit("min").unwrap();
        assert_eq!(unit.code, "min");
        assert_eq!(factor, Decimal::ONE);

        // prefixes do not apply to non-metric atoms
        assert!(get_prefixed_unit("k[lb_av]").is_none());
    }

    #[test]
    fn test_alias_resolution() {
        assert_eq!(resolve_alias("mcg"), "ug");
        assert_eq!(resolve_alias("cc"), "mL");
        assert_eq!(resolve_alias("g"), "g");
    }
}
