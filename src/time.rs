//! Exact experiment clock.
//!
//! Action timestamps are arbitrary-precision rationals measured in
//! milliseconds from the start of a repetition. The tie-break increments that
//! keep simultaneous exposures strictly ordered (1e-10 ms by default) are far
//! below `f64` resolution at realistic experiment durations, so the clock is
//! never stored as floating point.
//!
//! # Example
//!
//! ```
//! use cockpit::time::ExactTime;
//!
//! let step: ExactTime = "1e-10".parse().unwrap();
//! let t = ExactTime::from_millis(1000) + &step;
//! assert!(t > ExactTime::from_millis(1000));
//! assert_eq!(t.to_string(), "1000.0000000001");
//! ```

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Fractional digits kept when a time is rendered as text.
const DISPLAY_DIGITS: usize = 12;

/// Largest decimal exponent magnitude accepted by the parser.
const MAX_EXPONENT: i64 = 1000;

/// Error returned when a decimal time literal cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time literal '{0}'")]
pub struct ParseTimeError(String);

/// A point in (or span of) experiment time, in milliseconds, held exactly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExactTime(BigRational);

impl ExactTime {
    /// The experiment origin.
    pub fn zero() -> Self {
        Self(BigRational::zero())
    }

    /// A whole number of milliseconds.
    pub fn from_millis(ms: i64) -> Self {
        Self(BigRational::from_integer(BigInt::from(ms)))
    }

    /// Exact conversion of a binary float. Returns `None` for NaN or infinity.
    ///
    /// The result is the exact value of the float, so `0.1` becomes
    /// `0.1000000000000000055511151231257827...`. Use [`FromStr`] for exact
    /// decimal constants.
    pub fn from_f64(ms: f64) -> Option<Self> {
        BigRational::from_float(ms).map(Self)
    }

    /// Nearest `f64`, for plotting and other lossy consumers.
    pub fn to_f64(&self) -> f64 {
        let numer = self.0.numer().to_f64().unwrap_or(f64::NAN);
        let denom = self.0.denom().to_f64().unwrap_or(f64::NAN);
        numer / denom
    }

    /// Exact product with a float factor. `None` if `factor` is not finite.
    pub fn scaled(&self, factor: f64) -> Option<Self> {
        BigRational::from_float(factor).map(|f| Self(&self.0 * f))
    }

    /// True for the origin.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True if strictly below zero.
    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// True if strictly above zero.
    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    /// The underlying rational.
    pub fn as_ratio(&self) -> &BigRational {
        &self.0
    }

    /// Lossless text form: the full decimal expansion when it terminates,
    /// `numer/denom` otherwise. Parsing the result gives back `self`.
    pub fn to_exact_string(&self) -> String {
        let denom = self.0.denom();
        let mut rest = denom.clone();
        let mut digits = [0usize; 2];
        for (count, factor) in digits.iter_mut().zip([2u32, 5]) {
            let factor = BigInt::from(factor);
            while (&rest % &factor).is_zero() {
                rest /= &factor;
                *count += 1;
            }
        }
        if !rest.is_one() {
            return format!("{}/{}", self.0.numer(), denom);
        }
        let digits = digits[0].max(digits[1]);
        let scaled = &self.0 * BigRational::from_integer(pow10(digits));
        fixed_point(&scaled.to_integer(), digits)
    }
}

impl Default for ExactTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<BigRational> for ExactTime {
    fn from(value: BigRational) -> Self {
        Self(value)
    }
}

impl Add<&ExactTime> for &ExactTime {
    type Output = ExactTime;

    fn add(self, rhs: &ExactTime) -> ExactTime {
        ExactTime(&self.0 + &rhs.0)
    }
}

impl Add<&ExactTime> for ExactTime {
    type Output = ExactTime;

    fn add(self, rhs: &ExactTime) -> ExactTime {
        ExactTime(self.0 + &rhs.0)
    }
}

impl Add for ExactTime {
    type Output = ExactTime;

    fn add(self, rhs: ExactTime) -> ExactTime {
        ExactTime(self.0 + rhs.0)
    }
}

impl AddAssign<&ExactTime> for ExactTime {
    fn add_assign(&mut self, rhs: &ExactTime) {
        self.0 += &rhs.0;
    }
}

impl Sub<&ExactTime> for &ExactTime {
    type Output = ExactTime;

    fn sub(self, rhs: &ExactTime) -> ExactTime {
        ExactTime(&self.0 - &rhs.0)
    }
}

/// Parses decimal literals such as `33`, `0.1`, `-2.5` or `1e-10` exactly,
/// and fractions such as `1/3`. Exponents are limited to ±1000.
impl FromStr for ExactTime {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let text = s.trim();

        if let Some((numer, denom)) = text.split_once('/') {
            let numer: BigInt = numer.trim().parse().map_err(|_| err())?;
            let denom: BigInt = denom.trim().parse().map_err(|_| err())?;
            if !denom.is_positive() {
                return Err(err());
            }
            return Ok(Self(BigRational::new(numer, denom)));
        }

        let (mantissa, exponent) = match text.find(|c: char| c == 'e' || c == 'E') {
            Some(idx) => {
                let exp: i64 = text[idx + 1..].parse().map_err(|_| err())?;
                if exp.abs() > MAX_EXPONENT {
                    return Err(err());
                }
                (&text[..idx], exp)
            }
            None => (text, 0),
        };

        let (negative, unsigned) = match mantissa.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
        };

        let (whole, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            return Err(err());
        }

        let digits = format!("{whole}{frac}");
        let mut numer: BigInt = digits.parse().map_err(|_| err())?;
        if negative {
            numer = -numer;
        }

        let scale = exponent - frac.len() as i64;
        let power = pow10(scale.unsigned_abs() as usize);
        let ratio = if scale >= 0 {
            BigRational::from_integer(numer * power)
        } else {
            BigRational::new(numer, power)
        };
        Ok(Self(ratio))
    }
}

fn pow10(exp: usize) -> BigInt {
    num_traits::pow(BigInt::from(10), exp)
}

/// Renders `int * 10^-scale` as a decimal, trailing zeros trimmed.
fn fixed_point(int: &BigInt, scale: usize) -> String {
    let sign = if int.is_negative() { "-" } else { "" };
    let mut digits = int.abs().to_string();
    if digits.len() <= scale {
        digits = format!("{}{digits}", "0".repeat(scale + 1 - digits.len()));
    }
    let (whole, frac) = digits.split_at(digits.len() - scale);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{sign}{whole}")
    } else {
        format!("{sign}{whole}.{frac}")
    }
}

/// Decimal rendering rounded to twelve fractional digits, trailing zeros
/// trimmed. Use [`ExactTime::to_exact_string`] where the value must survive.
impl fmt::Display for ExactTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scaled = (&self.0 * BigRational::from_integer(pow10(DISPLAY_DIGITS))).round();
        f.write_str(&fixed_point(&scaled.to_integer(), DISPLAY_DIGITS))
    }
}

/// Serialized losslessly through [`ExactTime::to_exact_string`].
impl Serialize for ExactTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_exact_string())
    }
}

/// Accepts either a string (a decimal or `numer/denom`, exact) or a plain
/// number (exact value of the float).
impl<'de> Deserialize<'de> for ExactTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(ms) => Ok(Self::from_millis(ms)),
            Raw::Float(ms) => Self::from_f64(ms)
                .ok_or_else(|| serde::de::Error::custom(format!("non-finite time {ms}"))),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}
