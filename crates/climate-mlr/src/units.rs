//! Physical units for cube data and coordinates.
//!
//! Units strings follow the UDUNITS conventions used by CF metadata
//! (`K`, `kg m-2 s-1`, `mm day-1`, `W m-2`, `degC`, `1`, `no_unit`, ...).
//! A parsed [`Units`] keeps the string it was created from (its origin) next
//! to a numeric representation made of a scale factor, an offset and
//! exponents of the SI base dimensions. Equality and conversion work on the
//! numeric representation, exponentiation tries to preserve the symbols.

use std::f64::consts::PI;
use std::fmt;

use log::{debug, warn};

use crate::error::{MlrError, Result};

const N_BASE: usize = 7;
const BASE_SYMBOLS: [&str; N_BASE] = ["kg", "m", "s", "K", "mol", "A", "cd"];

type Dims = [i32; N_BASE];

const KG: Dims = [1, 0, 0, 0, 0, 0, 0];
const M: Dims = [0, 1, 0, 0, 0, 0, 0];
const S: Dims = [0, 0, 1, 0, 0, 0, 0];
const TEMP: Dims = [0, 0, 0, 1, 0, 0, 0];
const MOL: Dims = [0, 0, 0, 0, 1, 0, 0];
const AMP: Dims = [0, 0, 0, 0, 0, 1, 0];
const CD: Dims = [0, 0, 0, 0, 0, 0, 1];
const NONE: Dims = [0; N_BASE];
const WATT: Dims = [1, 2, -3, 0, 0, 0, 0];
const JOULE: Dims = [1, 2, -2, 0, 0, 0, 0];
const NEWTON: Dims = [1, 1, -2, 0, 0, 0, 0];
const PASCAL: Dims = [1, -1, -2, 0, 0, 0, 0];
const HERTZ: Dims = [0, 0, -1, 0, 0, 0, 0];
const VOLUME: Dims = [0, 3, 0, 0, 0, 0, 0];

const SECONDS_PER_YEAR: f64 = 3.155_692_597_47e7;
const ZERO_CELSIUS: f64 = 273.15;
const REL_TOL: f64 = 1e-12;

/// A named unit symbol: (names, scale to SI, offset, dimensions, accepts SI prefixes)
struct Symbol {
    names: &'static [&'static str],
    scale: f64,
    offset: f64,
    dims: Dims,
    prefixable: bool,
}

const SYMBOLS: &[Symbol] = &[
    Symbol { names: &["m", "meter", "metre", "meters", "metres"], scale: 1.0, offset: 0.0, dims: M, prefixable: true },
    Symbol { names: &["g", "gram", "grams"], scale: 1e-3, offset: 0.0, dims: KG, prefixable: true },
    Symbol { names: &["s", "sec", "second", "seconds"], scale: 1.0, offset: 0.0, dims: S, prefixable: true },
    Symbol { names: &["K", "kelvin"], scale: 1.0, offset: 0.0, dims: TEMP, prefixable: true },
    Symbol { names: &["mol", "mole"], scale: 1.0, offset: 0.0, dims: MOL, prefixable: true },
    Symbol { names: &["A", "ampere"], scale: 1.0, offset: 0.0, dims: AMP, prefixable: true },
    Symbol { names: &["cd", "candela"], scale: 1.0, offset: 0.0, dims: CD, prefixable: true },
    Symbol { names: &["W", "watt"], scale: 1.0, offset: 0.0, dims: WATT, prefixable: true },
    Symbol { names: &["J", "joule"], scale: 1.0, offset: 0.0, dims: JOULE, prefixable: true },
    Symbol { names: &["N", "newton"], scale: 1.0, offset: 0.0, dims: NEWTON, prefixable: true },
    Symbol { names: &["Pa", "pascal"], scale: 1.0, offset: 0.0, dims: PASCAL, prefixable: true },
    Symbol { names: &["Hz", "hertz"], scale: 1.0, offset: 0.0, dims: HERTZ, prefixable: true },
    Symbol { names: &["bar"], scale: 1e5, offset: 0.0, dims: PASCAL, prefixable: true },
    Symbol { names: &["L", "l", "liter", "litre"], scale: 1e-3, offset: 0.0, dims: VOLUME, prefixable: true },
    Symbol { names: &["t", "tonne"], scale: 1e3, offset: 0.0, dims: KG, prefixable: false },
    Symbol { names: &["min", "minute", "minutes"], scale: 60.0, offset: 0.0, dims: S, prefixable: false },
    Symbol { names: &["h", "hr", "hour", "hours"], scale: 3600.0, offset: 0.0, dims: S, prefixable: false },
    Symbol { names: &["d", "day", "days"], scale: 86400.0, offset: 0.0, dims: S, prefixable: false },
    Symbol { names: &["yr", "year", "years"], scale: SECONDS_PER_YEAR, offset: 0.0, dims: S, prefixable: false },
    Symbol {
        names: &["degC", "deg_C", "celsius", "degree_Celsius", "degrees_Celsius"],
        scale: 1.0,
        offset: ZERO_CELSIUS,
        dims: TEMP,
        prefixable: false,
    },
    Symbol {
        names: &[
            "degree", "degrees", "deg", "degree_north", "degrees_north", "degree_N", "degrees_N",
            "degree_east", "degrees_east", "degree_E", "degrees_E",
        ],
        scale: PI / 180.0,
        offset: 0.0,
        dims: NONE,
        prefixable: false,
    },
    Symbol { names: &["rad", "radian", "sr"], scale: 1.0, offset: 0.0, dims: NONE, prefixable: false },
    Symbol { names: &["1"], scale: 1.0, offset: 0.0, dims: NONE, prefixable: false },
    Symbol { names: &["%", "percent"], scale: 1e-2, offset: 0.0, dims: NONE, prefixable: false },
    Symbol { names: &["ppm"], scale: 1e-6, offset: 0.0, dims: NONE, prefixable: false },
    Symbol { names: &["ppb"], scale: 1e-9, offset: 0.0, dims: NONE, prefixable: false },
];

const PREFIXES: &[(&str, f64)] = &[
    ("da", 1e1),
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
];

#[derive(Clone, Debug)]
enum Kind {
    Unknown,
    NoUnit,
    Known { scale: f64, offset: f64, dims: Dims },
}

/// Parsed physical units.
#[derive(Clone, Debug)]
pub struct Units {
    origin: Option<String>,
    kind: Kind,
}

impl Units {
    /// Parse a units string.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        match trimmed {
            "no_unit" | "no unit" | "no-unit" => return Ok(Self::no_unit()),
            "unknown" | "?" => return Ok(Self::unknown()),
            "" => return Ok(Self::dimensionless()),
            _ => {}
        }
        let (scale, offset, dims) = parse_expression(trimmed)?;
        Ok(Self {
            origin: Some(trimmed.to_string()),
            kind: Kind::Known { scale, offset, dims },
        })
    }

    pub fn dimensionless() -> Self {
        Self {
            origin: Some("1".to_string()),
            kind: Kind::Known { scale: 1.0, offset: 0.0, dims: NONE },
        }
    }

    pub fn no_unit() -> Self {
        Self { origin: Some("no_unit".to_string()), kind: Kind::NoUnit }
    }

    pub fn unknown() -> Self {
        Self { origin: Some("unknown".to_string()), kind: Kind::Unknown }
    }

    /// The string these units were created from, if any.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn is_no_unit(&self) -> bool {
        matches!(self.kind, Kind::NoUnit)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, Kind::Unknown)
    }

    /// Scale factor relative to the coherent SI unit of the same dimension.
    pub fn scale(&self) -> Option<f64> {
        match self.kind {
            Kind::Known { scale, .. } => Some(scale),
            _ => None,
        }
    }

    /// Whether values in these units can be converted to `other`.
    pub fn is_convertible(&self, other: &Units) -> bool {
        match (&self.kind, &other.kind) {
            (Kind::Known { dims: a, .. }, Kind::Known { dims: b, .. }) => a == b,
            _ => false,
        }
    }

    /// Returns `(factor, shift)` such that `value * factor + shift` converts
    /// a value from `self` into `to`.
    pub fn converter(&self, to: &Units) -> Result<(f64, f64)> {
        match (&self.kind, &to.kind) {
            (
                Kind::Known { scale: s1, offset: o1, dims: d1 },
                Kind::Known { scale: s2, offset: o2, dims: d2 },
            ) if d1 == d2 => Ok((s1 / s2, (o1 - o2) / s2)),
            _ => Err(MlrError::Units(format!(
                "Cannot convert from '{}' to '{}'",
                self, to
            ))),
        }
    }

    /// Convert a single value from `self` into `to`.
    pub fn convert(&self, value: f64, to: &Units) -> Result<f64> {
        let (factor, shift) = self.converter(to)?;
        Ok(value * factor + shift)
    }

    /// Product of two units. The origin strings are joined when both exist.
    pub fn multiply(&self, other: &Units) -> Result<Units> {
        match (&self.kind, &other.kind) {
            (
                Kind::Known { scale: s1, dims: d1, .. },
                Kind::Known { scale: s2, dims: d2, .. },
            ) => {
                let mut dims = NONE;
                for i in 0..N_BASE {
                    dims[i] = d1[i] + d2[i];
                }
                let origin = match (&self.origin, &other.origin) {
                    (Some(a), Some(b)) if a == "1" => Some(b.clone()),
                    (Some(a), Some(b)) if b == "1" => Some(a.clone()),
                    (Some(a), Some(b)) => Some(format!("{} {}", a, b)),
                    _ => None,
                };
                Ok(Units { origin, kind: Kind::Known { scale: s1 * s2, offset: 0.0, dims } })
            }
            _ => Err(MlrError::Units(format!(
                "Cannot multiply units '{}' and '{}'",
                self, other
            ))),
        }
    }

    /// Raise units to a power, keeping symbols where possible.
    ///
    /// `K` becomes `K2`, `kg m-2` becomes `kg2 m-4`. Exponents that would end
    /// up non-integral are a type error. `no_unit` and `unknown` are returned
    /// unchanged with a warning; units without an origin string or with a
    /// leading number are raised numerically with a warning.
    pub fn pow(&self, power: f64) -> Result<Units> {
        let (scale, dims) = match &self.kind {
            Kind::Known { scale, dims, .. } => (*scale, *dims),
            _ => {
                warn!(
                    "Cannot raise units '{}' to power {}, returning them unchanged",
                    self, power
                );
                return Ok(self.clone());
            }
        };
        if (power - 1.0).abs() < f64::EPSILON {
            return Ok(self.clone());
        }

        let mut new_dims = NONE;
        for i in 0..N_BASE {
            new_dims[i] = integral_exponent(dims[i], power).ok_or_else(|| {
                MlrError::Type(format!(
                    "Raising units '{}' to power {} gives non-integral exponents",
                    self, power
                ))
            })?;
        }
        let numeric = Units {
            origin: None,
            kind: Kind::Known { scale: scale.powf(power), offset: 0.0, dims: new_dims },
        };

        let origin = match &self.origin {
            Some(origin) => origin,
            None => {
                warn!(
                    "Units '{}' have no origin string, raising them to power {} numerically",
                    self, power
                );
                return Ok(numeric);
            }
        };
        if starts_with_number(origin) {
            warn!(
                "Units '{}' start with a number, raising them to power {} numerically",
                origin, power
            );
            return Ok(numeric);
        }
        if origin.contains(['/', '^', '*']) {
            debug!("Units '{}' use operators, raising them numerically", origin);
            return Ok(numeric);
        }

        let mut elements = Vec::new();
        for element in origin.split(|c: char| c.is_whitespace() || c == '.') {
            if element.is_empty() {
                continue;
            }
            let (name, exponent) = split_exponent(element);
            let new_exponent = integral_exponent(exponent, power).ok_or_else(|| {
                MlrError::Type(format!(
                    "Raising '{}' in units '{}' to power {} gives a non-integral exponent",
                    element, origin, power
                ))
            })?;
            match new_exponent {
                0 => {}
                1 => elements.push(name.to_string()),
                n => elements.push(format!("{}{}", name, n)),
            }
        }
        if elements.is_empty() {
            return Ok(Units::dimensionless());
        }
        Units::parse(&elements.join(" "))
    }
}

impl PartialEq for Units {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (Kind::Unknown, Kind::Unknown) | (Kind::NoUnit, Kind::NoUnit) => true,
            (
                Kind::Known { scale: s1, offset: o1, dims: d1 },
                Kind::Known { scale: s2, offset: o2, dims: d2 },
            ) => {
                d1 == d2
                    && (s1 - s2).abs() <= REL_TOL * s1.abs().max(s2.abs())
                    && (o1 - o2).abs() <= 1e-9
            }
            _ => false,
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(origin) = &self.origin {
            return write!(f, "{}", origin);
        }
        match &self.kind {
            Kind::Unknown => write!(f, "unknown"),
            Kind::NoUnit => write!(f, "no_unit"),
            Kind::Known { scale, dims, .. } => {
                let mut parts = Vec::new();
                if (scale - 1.0).abs() > REL_TOL {
                    parts.push(format!("{}", scale));
                }
                for (symbol, exponent) in BASE_SYMBOLS.iter().zip(dims.iter()) {
                    match exponent {
                        0 => {}
                        1 => parts.push(symbol.to_string()),
                        n => parts.push(format!("{}{}", symbol, n)),
                    }
                }
                if parts.is_empty() {
                    write!(f, "1")
                } else {
                    write!(f, "{}", parts.join(" "))
                }
            }
        }
    }
}

fn integral_exponent(exponent: i32, power: f64) -> Option<i32> {
    let value = exponent as f64 * power;
    if (value - value.round()).abs() < 1e-9 {
        Some(value.round() as i32)
    } else {
        None
    }
}

fn starts_with_number(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .map_or(false, |first| first.parse::<f64>().is_ok())
}

/// Split `m-2` into `("m", -2)`; tokens without exponent get 1.
fn split_exponent(token: &str) -> (&str, i32) {
    if let Some((name, exponent)) = token.split_once('^') {
        if let Ok(exponent) = exponent.parse::<i32>() {
            return (name, exponent);
        }
    }
    let bytes = token.as_bytes();
    let mut start = bytes.len();
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }
    if start == bytes.len() || start == 0 {
        return (token, 1);
    }
    if start > 1 && (bytes[start - 1] == b'-' || bytes[start - 1] == b'+') {
        start -= 1;
    }
    match token[start..].parse::<i32>() {
        Ok(exponent) if start > 0 => (&token[..start], exponent),
        _ => (token, 1),
    }
}

fn lookup_symbol(name: &str) -> Option<(f64, f64, Dims)> {
    if let Some(symbol) = SYMBOLS.iter().find(|s| s.names.contains(&name)) {
        return Some((symbol.scale, symbol.offset, symbol.dims));
    }
    for (prefix, factor) in PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            if let Some(symbol) = SYMBOLS
                .iter()
                .find(|s| s.prefixable && s.names.first() == Some(&rest))
            {
                return Some((symbol.scale * factor, 0.0, symbol.dims));
            }
        }
    }
    None
}

fn parse_expression(text: &str) -> Result<(f64, f64, Dims)> {
    let spaced = text.replace("**", "^").replace('/', " / ");
    let mut scale = 1.0;
    let mut dims = NONE;
    let mut offset = 0.0;
    let mut n_symbols = 0;
    let mut divide_next = false;

    for raw in spaced.split(|c: char| c.is_whitespace() || c == '*') {
        if raw.is_empty() {
            continue;
        }
        if raw == "/" {
            divide_next = true;
            continue;
        }
        if let Ok(number) = raw.parse::<f64>() {
            scale *= if divide_next { 1.0 / number } else { number };
            divide_next = false;
            continue;
        }
        for token in raw.split('.').filter(|t| !t.is_empty()) {
            let (name, mut exponent) = split_exponent(token);
            let (symbol_scale, symbol_offset, symbol_dims) = lookup_symbol(name)
                .or_else(|| lookup_symbol(token).map(|found| {
                    exponent = 1;
                    found
                }))
                .ok_or_else(|| {
                    MlrError::Units(format!("Unknown unit symbol '{}' in '{}'", token, text))
                })?;
            if divide_next {
                exponent = -exponent;
                divide_next = false;
            }
            scale *= symbol_scale.powi(exponent);
            for i in 0..N_BASE {
                dims[i] += symbol_dims[i] * exponent;
            }
            if exponent == 1 {
                offset = symbol_offset;
            }
            n_symbols += 1;
        }
    }
    if n_symbols != 1 {
        offset = 0.0;
    }
    Ok((scale, offset, dims))
}
