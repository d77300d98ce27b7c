//! Units of measure: conversion of unit expressions to an SI scale factor and
//! a dimension vector
//!
//! Only products and quotients of known units with integer exponents are
//! understood (`kg*m/s^2`, `1/s`, `kJ/mol/K`). Offsets such as degrees
//! Celsius are not supported.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::CompileError;

pub const DIMENSION_COUNT: usize = 10;

/// Base dimensions, in dimension-vector order.
pub const BASE_DIMENSIONS: [(&str, &str); DIMENSION_COUNT] = [
    ("M", "kg"),
    ("Q", "mole"),
    ("L", "m"),
    ("T", "s"),
    ("TMP", "K"),
    ("C", "USD"),
    ("E", "A"),
    ("LUM", "cd"),
    ("P", "rad"),
    ("S", "sr"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Dimensions(pub [i8; DIMENSION_COUNT]);

impl Dimensions {
    pub fn dimensionless() -> Self {
        Self::default()
    }

    pub fn base(index: usize) -> Self {
        let mut d = [0; DIMENSION_COUNT];
        d[index] = 1;
        Self(d)
    }

    pub fn is_dimensionless(&self) -> bool {
        self.0.iter().all(|e| *e == 0)
    }

    fn combine(self, other: Dimensions, power: i8) -> Dimensions {
        let mut d = self.0;
        for (a, b) in d.iter_mut().zip(other.0) {
            *a += b * power;
        }
        Dimensions(d)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }
        let parts: Vec<String> = self
            .0
            .iter()
            .zip(BASE_DIMENSIONS)
            .filter(|(e, _)| **e != 0)
            .map(|(e, (sym, _))| {
                if *e == 1 {
                    sym.to_string()
                } else {
                    format!("{}^{}", sym, e)
                }
            })
            .collect();
        write!(f, "{}", parts.join("*"))
    }
}

/// A unit: multiply a value in this unit by `scale` to get SI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Unit {
    pub scale: f64,
    pub dims: Dimensions,
}

impl Unit {
    pub fn new(scale: f64, dims: Dimensions) -> Self {
        Self { scale, dims }
    }

    pub fn dimensionless() -> Self {
        Self::new(1.0, Dimensions::dimensionless())
    }

    fn pow(self, power: i8) -> Unit {
        Unit {
            scale: self.scale.powi(power as i32),
            dims: Dimensions::dimensionless().combine(self.dims, power),
        }
    }

    fn mul(self, other: Unit) -> Unit {
        Unit {
            scale: self.scale * other.scale,
            dims: self.dims.combine(other.dims, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitsTable {
    units: HashMap<String, Unit>,
}

impl Default for UnitsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitsTable {
    /// Table with the base units and the usual derived units.
    pub fn new() -> Self {
        let mut table = Self {
            units: HashMap::new(),
        };
        for (i, (_, sym)) in BASE_DIMENSIONS.iter().enumerate() {
            table.insert(sym, Unit::new(1.0, Dimensions::base(i)));
        }
        let derived: [(&str, &str); 34] = [
            ("g", "1e-3*kg"),
            ("mol", "1e-3*mole"),
            ("gmol", "1e-3*mole"),
            ("kmol", "mole"),
            ("lbmol", "0.45359237*mole"),
            ("cm", "1e-2*m"),
            ("mm", "1e-3*m"),
            ("km", "1e3*m"),
            ("ft", "0.3048*m"),
            ("inch", "0.0254*m"),
            ("min", "60*s"),
            ("h", "3600*s"),
            ("hr", "3600*s"),
            ("day", "86400*s"),
            ("R", "0.5555555555555556*K"),
            ("lbm", "0.45359237*kg"),
            ("t", "1e3*kg"),
            ("N", "kg*m/s^2"),
            ("J", "N*m"),
            ("kJ", "1e3*J"),
            ("MJ", "1e6*J"),
            ("cal", "4.184*J"),
            ("W", "J/s"),
            ("kW", "1e3*W"),
            ("Pa", "N/m^2"),
            ("kPa", "1e3*Pa"),
            ("MPa", "1e6*Pa"),
            ("bar", "1e5*Pa"),
            ("atm", "101325*Pa"),
            ("L", "1e-3*m^3"),
            ("Hz", "1/s"),
            ("C", "A*s"),
            ("V", "W/A"),
            ("ohm", "V/A"),
        ];
        for (sym, def) in derived {
            // Definitions only refer to units defined before them.
            if let Ok(unit) = table.parse(def) {
                table.insert(sym, unit);
            }
        }
        table.insert("deg", Unit::new(std::f64::consts::PI / 180.0, Dimensions::base(8)));
        table
    }

    pub fn insert(&mut self, symbol: &str, unit: Unit) {
        self.units.insert(symbol.to_string(), unit);
    }

    pub fn get(&self, symbol: &str) -> Option<Unit> {
        self.units.get(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }

    /// Parse a unit expression such as `kg*m/s^2` or `1/s`.
    pub fn parse(&self, text: &str) -> Result<Unit, CompileError> {
        let text = text.trim();
        if text.is_empty() || text == "?" {
            return Ok(Unit::dimensionless());
        }
        let mut result = Unit::dimensionless();
        let mut sign = 1i8;
        let mut token = String::new();
        for ch in text.chars().chain(std::iter::once('*')) {
            match ch {
                '*' | '/' => {
                    let factor = self.parse_factor(token.trim(), text)?;
                    result = result.mul(factor.pow(sign));
                    token.clear();
                    sign = if ch == '/' { -1 } else { 1 };
                }
                c if c.is_whitespace() => {}
                c => token.push(c),
            }
        }
        Ok(result)
    }

    fn parse_factor(&self, token: &str, whole: &str) -> Result<Unit, CompileError> {
        if token.is_empty() {
            return Err(CompileError::Units(format!("malformed unit expression '{}'", whole)));
        }
        let (base, power) = match token.split_once('^') {
            Some((b, p)) => {
                let p: i8 = p.parse().map_err(|_| {
                    CompileError::Units(format!("bad exponent '{}' in '{}'", p, whole))
                })?;
                (b, p)
            }
            None => (token, 1),
        };
        if let Ok(number) = base.parse::<f64>() {
            return Ok(Unit::new(number.powi(power as i32), Dimensions::dimensionless()));
        }
        self.get(base)
            .map(|u| u.pow(power))
            .ok_or_else(|| CompileError::Units(format!("unknown unit '{}' in '{}'", base, whole)))
    }

    /// Convert `value` expressed in `units` to SI.
    pub fn to_si(&self, value: f64, units: &str) -> Result<(f64, Dimensions), CompileError> {
        let unit = self.parse(units)?;
        Ok((value * unit.scale, unit.dims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn test_base_and_derived() {
        let table = UnitsTable::new();
        let newton = table.parse("kg*m/s^2").unwrap();
        assert_eq!(newton, table.get("N").unwrap());
        assert_eq!(newton.dims.to_string(), "M*L*T^-2");

        let kpa = table.get("kPa").unwrap();
        assert!(close(kpa.scale, 1000.0));
    }

    #[test]
    fn test_conversions() {
        let table = UnitsTable::new();
        let (v, dims) = table.to_si(2.0, "kJ/mol/K").unwrap();
        assert!(close(v, 2.0e6));
        assert_eq!(dims.to_string(), "M*Q^-1*L^2*T^-2*TMP^-1");

        let (v, _) = table.to_si(3.0, "1/min").unwrap();
        assert!(close(v, 0.05));
        assert!(table.to_si(1.0, "").unwrap().1.is_dimensionless());
    }

    #[test]
    fn test_unknown_unit() {
        let table = UnitsTable::new();
        assert!(matches!(table.parse("furlong/fortnight"), Err(CompileError::Units(_))));
        assert!(matches!(table.parse("m^x"), Err(CompileError::Units(_))));
        assert!(matches!(table.parse("m**2"), Err(CompileError::Units(_))));
    }

    proptest::proptest! {
        #[test]
        fn prop_conversion_is_linear(
            v in -1e6f64..1e6,
            unit in proptest::sample::select(vec!["m", "km", "kPa", "mol/s", "kJ/mol/K"]),
        ) {
            let table = UnitsTable::new();
            let (one, dims) = table.to_si(1.0, unit).unwrap();
            let (scaled, scaled_dims) = table.to_si(v, unit).unwrap();
            proptest::prop_assert!(close(scaled, v * one));
            proptest::prop_assert_eq!(dims, scaled_dims);
        }
    }
}
