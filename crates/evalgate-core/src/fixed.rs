//! Fixed-point decimal for monetary values and gate thresholds.
//!
//! Amounts are stored as an `i128` count of 10^-12 units (pico-dollars for
//! money). Arithmetic on persisted or compared values never goes through
//! `f64`; floats only enter at the edge via [`Fixed::from_f64`], which
//! rounds to the nearest representable unit.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional decimal digits carried by [`Fixed`].
pub const FRACTIONAL_DIGITS: u32 = 12;

const SCALE: i128 = 1_000_000_000_000;

/// Errors from parsing a decimal string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FixedParseError {
    #[error("empty decimal string")]
    Empty,

    #[error("invalid decimal '{0}'")]
    Invalid(String),

    #[error("decimal '{value}' has more than {max} fractional digits")]
    TooPrecise { value: String, max: u32 },

    #[error("decimal '{0}' is out of range")]
    OutOfRange(String),
}

/// Signed fixed-point decimal with 12 fractional digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(i128);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(SCALE);

    /// Build from raw 10^-12 units.
    pub const fn from_raw(raw: i128) -> Self {
        Self(raw)
    }

    /// Raw 10^-12 units.
    pub const fn raw(self) -> i128 {
        self.0
    }

    /// Build from a whole number.
    pub const fn from_int(value: i64) -> Self {
        Self(value as i128 * SCALE)
    }

    /// Round a float to the nearest representable value.
    ///
    /// Returns `None` for NaN, infinities, and magnitudes beyond `i64::MAX`.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value.abs() > i64::MAX as f64 {
            return None;
        }
        let scaled = (value * SCALE as f64).round();
        Some(Self(scaled as i128))
    }

    /// Lossy conversion for display and scoring heuristics only.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Number of significant fractional digits (trailing zeros stripped).
    pub fn fractional_digits(self) -> u32 {
        let mut frac = (self.0 % SCALE).abs();
        if frac == 0 {
            return 0;
        }
        let mut digits = FRACTIONAL_DIGITS;
        while frac % 10 == 0 {
            frac /= 10;
            digits -= 1;
        }
        digits
    }

    /// `self * count / 1_000_000`, truncating toward zero.
    ///
    /// Exact whenever `self` has at most six fractional digits, which is the
    /// invariant price tables enforce for per-million rates.
    pub fn per_million(self, count: u64) -> Self {
        Self(self.0 * count as i128 / 1_000_000)
    }

    /// `self * numerator / denominator`, truncating toward zero.
    pub fn scale_by(self, numerator: u32, denominator: u32) -> Self {
        if denominator == 0 {
            return Self::ZERO;
        }
        Self(self.0 * numerator as i128 / denominator as i128)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Sum for Fixed {
    fn sum<I: Iterator<Item = Fixed>>(iter: I) -> Self {
        iter.fold(Fixed::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Fixed> for Fixed {
    fn sum<I: Iterator<Item = &'a Fixed>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let int_part = abs / SCALE as u128;
        let frac_part = abs % SCALE as u128;

        if frac_part == 0 {
            return write!(f, "{}{}", sign, int_part);
        }

        let frac = format!("{:012}", frac_part);
        write!(f, "{}{}.{}", sign, int_part, frac.trim_end_matches('0'))
    }
}

impl FromStr for Fixed {
    type Err = FixedParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(FixedParseError::Empty);
        }

        let (negative, body) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let (int_str, frac_str) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (int_str.is_empty() && frac_str.is_empty()) || !all_digits(int_str) || !all_digits(frac_str)
        {
            return Err(FixedParseError::Invalid(s.to_string()));
        }

        let frac_significant = frac_str.trim_end_matches('0');
        if frac_significant.len() > FRACTIONAL_DIGITS as usize {
            return Err(FixedParseError::TooPrecise {
                value: s.to_string(),
                max: FRACTIONAL_DIGITS,
            });
        }

        let int_value: i128 = if int_str.is_empty() {
            0
        } else {
            int_str
                .parse()
                .map_err(|_| FixedParseError::OutOfRange(s.to_string()))?
        };

        let mut frac_value: i128 = 0;
        for (i, b) in frac_significant.bytes().enumerate() {
            let digit = (b - b'0') as i128;
            frac_value += digit * 10_i128.pow(FRACTIONAL_DIGITS - 1 - i as u32);
        }

        let raw = int_value
            .checked_mul(SCALE)
            .and_then(|v| v.checked_add(frac_value))
            .ok_or_else(|| FixedParseError::OutOfRange(s.to_string()))?;

        Ok(Self(if negative { -raw } else { raw }))
    }
}

impl Serialize for Fixed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

struct FixedVisitor;

impl<'de> Visitor<'de> for FixedVisitor {
    type Value = Fixed;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Fixed, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Fixed, E> {
        Ok(Fixed::from_int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Fixed, E> {
        i64::try_from(v)
            .map(Fixed::from_int)
            .map_err(|_| E::custom(format!("{} is out of range", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Fixed, E> {
        // Route through the shortest round-trip string so 0.1 parses as 0.1.
        let repr = format!("{}", v);
        match repr.parse::<Fixed>() {
            Ok(fixed) => Ok(fixed),
            Err(_) => Fixed::from_f64(v)
                .ok_or_else(|| E::custom(format!("{} is not a finite decimal", v))),
        }
    }
}

impl<'de> Deserialize<'de> for Fixed {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FixedVisitor)
    }
}
