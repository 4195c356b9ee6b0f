//! Quantity - exact base-10 measurement values
//!
//! Every metered amount flows through [`Quantity`]. Arithmetic is checked and
//! never touches binary floating point; equality, ordering and hashing follow
//! the numeric value, so `"1.0"` and `"1"` compare equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::QuantityError;

/// Largest scale a quantity can carry
pub const MAX_SCALE: u32 = 28;

/// Exact decimal quantity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);
    pub const ONE: Quantity = Quantity(Decimal::ONE);

    /// Wrap an existing decimal
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Parse a textual quantity.
    ///
    /// Accepts plain notation (`"-12.50"`) and scientific notation
    /// (`"1.5e3"`). Digit separators, bare dots and values that would lose
    /// digits are rejected rather than interpreted or rounded.
    ///
    /// ```
    /// use meterline_common::Quantity;
    ///
    /// let q = Quantity::parse(" 145 ").unwrap();
    /// assert_eq!(q.to_string(), "145");
    /// assert!(Quantity::parse("fast").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let invalid = || QuantityError::Invalid(input.to_string());
        let trimmed = input.trim();
        if !is_decimal_literal(trimmed) {
            return Err(invalid());
        }

        let (mantissa, exponent) = split_exponent(trimmed);
        let base = Decimal::from_str_exact(mantissa).map_err(|_| invalid())?;
        let exponent = exponent
            .map_or(Ok(0), str::parse::<i64>)
            .map_err(|_| invalid())?;

        let scale = i64::from(base.scale()) - exponent;
        let value = if scale >= 0 {
            u32::try_from(scale)
                .map_err(|_| QuantityError::Inexact)
                .and_then(|scale| exact(base.mantissa(), scale))
        } else {
            u32::try_from(-scale)
                .ok()
                .and_then(|shift| 10i128.checked_pow(shift))
                .and_then(|factor| base.mantissa().checked_mul(factor))
                .ok_or(QuantityError::Overflow)
                .and_then(|units| exact(units, 0))
        };
        value.map_err(|_| invalid())
    }

    /// Underlying decimal
    #[inline]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Number of digits after the decimal point as stored
    #[inline]
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Exact sum; a result that needs more than 28 digits is an error
    pub fn checked_add(self, other: Quantity) -> Result<Quantity, QuantityError> {
        let scale = self.scale().max(other.scale());
        let units = units_at_scale(self.0, scale)?
            .checked_add(units_at_scale(other.0, scale)?)
            .ok_or(QuantityError::Overflow)?;
        exact(units, scale)
    }

    pub fn checked_sub(self, other: Quantity) -> Result<Quantity, QuantityError> {
        self.checked_add(Quantity(-other.0))
    }

    /// Exact product; never rounds away digits
    pub fn checked_mul(self, other: Quantity) -> Result<Quantity, QuantityError> {
        let product = |a: Decimal, b: Decimal| {
            a.mantissa()
                .checked_mul(b.mantissa())
                .map(|units| (units, a.scale() + b.scale()))
        };
        let (units, scale) = product(self.0, other.0)
            .or_else(|| product(self.0.normalize(), other.0.normalize()))
            .ok_or(QuantityError::Overflow)?;
        exact(units, scale)
    }

    /// Quotient rounded to 28 significant digits
    pub fn checked_div(self, other: Quantity) -> Result<Quantity, QuantityError> {
        if other.0.is_zero() {
            return Err(QuantityError::DivisionByZero);
        }
        self.0
            .checked_div(other.0)
            .map(Quantity)
            .ok_or(QuantityError::Overflow)
    }

    /// Exact sum of an iterator of quantities
    pub fn sum<I>(values: I) -> Result<Quantity, QuantityError>
    where
        I: IntoIterator<Item = Quantity>,
    {
        values
            .into_iter()
            .try_fold(Quantity::ZERO, |acc, q| acc.checked_add(q))
    }

    /// Round to `dp` decimal places, ties to even
    pub fn round_half_even(&self, dp: u32) -> Quantity {
        Quantity(
            self.0
                .round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven),
        )
    }

    /// Same value with trailing zeros removed (`"1.500"` becomes `"1.5"`)
    pub fn normalized(&self) -> Quantity {
        Quantity(self.0.normalize())
    }

    /// Mean of the quantities in `steps`, each weighted by its integer
    /// weight, rounded half-to-even to `dp` places.
    ///
    /// The weighted sum is taken on exact integer mantissas relative to the
    /// first value, so its size depends on the spread of the values rather
    /// than their magnitude, and the final division is the only rounding.
    /// When the integer part leaves no room for `dp` places within 28 digits,
    /// the result keeps as many places as fit.
    ///
    /// ```
    /// use meterline_common::Quantity;
    ///
    /// let steps = [(Quantity::from(10i64), 1), (Quantity::from(20i64), 3)];
    /// let avg = Quantity::weighted_average(&steps, 12).unwrap();
    /// assert_eq!(avg.normalized().to_string(), "17.5");
    /// ```
    pub fn weighted_average(steps: &[(Quantity, u64)], dp: u32) -> Result<Quantity, QuantityError> {
        let total: i128 = steps.iter().map(|(_, weight)| i128::from(*weight)).sum();
        if total == 0 {
            return Err(QuantityError::DivisionByZero);
        }

        let scale = steps.iter().map(|(q, _)| q.scale()).max().unwrap_or(0);
        let units = steps
            .iter()
            .map(|(q, _)| units_at_scale(q.0, scale))
            .collect::<Result<Vec<_>, _>>()?;
        let reference = units.first().copied().ok_or(QuantityError::DivisionByZero)?;

        let mut offset: i128 = 0;
        for (value, (_, weight)) in units.iter().zip(steps) {
            offset = value
                .checked_sub(reference)
                .and_then(|delta| delta.checked_mul(i128::from(*weight)))
                .and_then(|weighted| offset.checked_add(weighted))
                .ok_or(QuantityError::Overflow)?;
        }

        // average * 10^scale == whole + remainder / total, 0 <= remainder < total
        let whole = reference
            .checked_add(offset.div_euclid(total))
            .ok_or(QuantityError::Overflow)?;
        let remainder = offset.rem_euclid(total);

        (0..=dp.min(MAX_SCALE))
            .rev()
            .find_map(|places| {
                let units = round_fraction(whole, remainder, total, scale, places)?;
                Decimal::try_from_i128_with_scale(units, places).ok()
            })
            .map(Quantity)
            .ok_or(QuantityError::Overflow)
    }

    /// Split into `parts` near-equal shares at `dp` decimal places.
    ///
    /// The shares always sum exactly to `self`. When `self` carries more
    /// digits than `dp`, its own scale is used instead. Leftover units go to
    /// the earliest shares.
    pub fn split(&self, parts: usize, dp: u32) -> Result<Vec<Quantity>, QuantityError> {
        if parts == 0 {
            return Err(QuantityError::EmptyAllocation);
        }

        let scale = dp.max(self.scale()).min(MAX_SCALE);
        let units = units_at_scale(self.0, scale)?;
        let n = parts as i128;
        let base = units / n;
        let leftover = (units % n).unsigned_abs() as usize;
        let step = units.signum();

        (0..parts)
            .map(|i| {
                let share = if i < leftover { base + step } else { base };
                from_units(share, scale)
            })
            .collect()
    }

    /// Allocate proportionally to `weights` at `dp` decimal places.
    ///
    /// Uses largest-remainder apportionment on integer units, so the parts sum
    /// exactly to `self`. Ties in remainder go to the earlier weight.
    pub fn allocate(&self, weights: &[Quantity], dp: u32) -> Result<Vec<Quantity>, QuantityError> {
        if weights.is_empty() {
            return Err(QuantityError::EmptyAllocation);
        }
        if weights.iter().any(Quantity::is_negative) {
            return Err(QuantityError::InvalidWeights);
        }

        let weight_scale = weights.iter().map(Quantity::scale).max().unwrap_or(0);
        let weight_units = weights
            .iter()
            .map(|w| units_at_scale(w.0, weight_scale))
            .collect::<Result<Vec<_>, _>>()?;
        let total_weight = weight_units
            .iter()
            .try_fold(0i128, |acc, w| acc.checked_add(*w))
            .ok_or(QuantityError::Overflow)?;
        if total_weight == 0 {
            return Err(QuantityError::InvalidWeights);
        }

        let scale = dp.max(self.scale()).min(MAX_SCALE);
        let units = units_at_scale(self.0, scale)?;
        let magnitude = units.abs();

        let mut shares = Vec::with_capacity(weights.len());
        let mut remainders = Vec::with_capacity(weights.len());
        for w in &weight_units {
            let numerator = magnitude.checked_mul(*w).ok_or(QuantityError::Overflow)?;
            shares.push(numerator / total_weight);
            remainders.push(numerator % total_weight);
        }

        let assigned: i128 = shares.iter().sum();
        let mut leftover = magnitude - assigned;

        let mut order: Vec<usize> = (0..weights.len()).collect();
        order.sort_by(|a, b| remainders[*b].cmp(&remainders[*a]).then(a.cmp(b)));
        for idx in order {
            if leftover == 0 {
                break;
            }
            shares[idx] += 1;
            leftover -= 1;
        }

        let sign = if units < 0 { -1 } else { 1 };
        shares
            .into_iter()
            .map(|s| from_units(s * sign, scale))
            .collect()
    }
}

/// `[+-]digits[.digits][(e|E)[+-]digits]`
fn is_decimal_literal(text: &str) -> bool {
    fn digits(part: &str) -> bool {
        !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
    }
    fn signed_digits(part: &str) -> bool {
        digits(part.strip_prefix(['+', '-']).unwrap_or(part))
    }

    let (mantissa, exponent) = split_exponent(text);
    let mantissa_ok = match mantissa.split_once('.') {
        Some((int, frac)) => signed_digits(int) && digits(frac),
        None => signed_digits(mantissa),
    };
    mantissa_ok && exponent.map_or(true, signed_digits)
}

fn split_exponent(text: &str) -> (&str, Option<&str>) {
    match text.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, Some(exponent)),
        None => (text, None),
    }
}

/// Integer mantissa of `value` expressed at exactly `scale` digits
fn units_at_scale(value: Decimal, scale: u32) -> Result<i128, QuantityError> {
    let shift = scale
        .checked_sub(value.scale())
        .ok_or(QuantityError::Inexact)?;
    10i128
        .checked_pow(shift)
        .and_then(|factor| value.mantissa().checked_mul(factor))
        .ok_or(QuantityError::Overflow)
}

/// `units * 10^-scale` without rounding. Trailing zeros are dropped only
/// when the value does not fit otherwise.
fn exact(mut units: i128, mut scale: u32) -> Result<Quantity, QuantityError> {
    if units == 0 {
        return Ok(Quantity(Decimal::new(0, scale.min(MAX_SCALE))));
    }
    loop {
        if scale <= MAX_SCALE {
            if let Ok(value) = Decimal::try_from_i128_with_scale(units, scale) {
                return Ok(Quantity(value));
            }
        }
        if scale == 0 {
            return Err(QuantityError::Overflow);
        }
        if units % 10 != 0 {
            return Err(if scale > MAX_SCALE {
                QuantityError::Inexact
            } else {
                QuantityError::Overflow
            });
        }
        units /= 10;
        scale -= 1;
    }
}

/// Mantissa at `places` of `(whole + remainder / total) * 10^-scale`,
/// ties to even. `None` when the result does not fit in an `i128`.
fn round_fraction(whole: i128, remainder: i128, total: i128, scale: u32, places: u32) -> Option<i128> {
    if places >= scale {
        let factor = 10i128.checked_pow(places - scale)?;
        let fraction = remainder.checked_mul(factor)?;
        let floor = whole.checked_mul(factor)?.checked_add(fraction / total)?;
        let twice = (fraction % total).checked_mul(2)?;
        let up = twice > total || (twice == total && floor % 2 != 0);
        floor.checked_add(i128::from(up))
    } else {
        let divisor = 10i128.checked_pow(scale - places)?;
        let floor = whole.div_euclid(divisor);
        let rest = whole.rem_euclid(divisor);
        let half = divisor / 2;
        // Remaining fraction is (rest + remainder / total) / divisor
        let up = rest > half || (rest == half && (remainder > 0 || floor % 2 != 0));
        floor.checked_add(i128::from(up))
    }
}

fn from_units(units: i128, scale: u32) -> Result<Quantity, QuantityError> {
    Decimal::try_from_i128_with_scale(units, scale)
        .map(Quantity)
        .map_err(|_| QuantityError::Overflow)
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl PartialEq<Decimal> for Quantity {
    fn eq(&self, other: &Decimal) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<Decimal> for Quantity {
    fn partial_cmp(&self, other: &Decimal) -> Option<Ordering> {
        self.0.partial_cmp(other)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl<'de> Visitor<'de> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or an integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
                Quantity::parse(v).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
                Ok(Quantity(Decimal::from(v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
                Ok(Quantity(Decimal::from(v)))
            }

            fn visit_f64<E: de::Error>(self, _v: f64) -> Result<Quantity, E> {
                Err(E::custom("fractional quantities must be encoded as strings"))
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}
