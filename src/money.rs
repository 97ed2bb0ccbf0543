//! Fixed-point money for reconciliation arithmetic.
//!
//! Every amount is held as signed integer cents, so sums and differences are
//! exact and equality never drifts. Rounding (half-up on the magnitude) only
//! happens when an amount is formatted with fewer than two decimals.
//! Negative values are legitimate: a shortage is a negative over/short.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// Residue tolerated when accepting an `f64` (REAL column) as cents.
const F64_CENT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal string such as `"12.30"`, `"-4"` or `"7.500"`.
    ///
    /// Digits past the second decimal are only accepted when they are all
    /// zero; `"1.005"` is an `InvalidAmount`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || ReconcileError::InvalidAmount(format!("'{input}'"));

        let trimmed = input.trim();
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole, frac) = match unsigned.split_once('.') {
            Some((w, f)) => (w, f),
            None => (unsigned, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        if frac.len() > 2 && frac[2..].bytes().any(|b| b != b'0') {
            return Err(ReconcileError::InvalidAmount(format!(
                "'{input}' has more than two significant decimals"
            )));
        }

        let whole_value: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut frac_digits = frac.bytes().take(2).map(|b| i64::from(b - b'0'));
        let tenths = frac_digits.next().unwrap_or(0);
        let hundredths = frac_digits.next().unwrap_or(0);

        let cents = whole_value
            .checked_mul(100)
            .and_then(|c| c.checked_add(tenths * 10 + hundredths))
            .ok_or_else(invalid)?;

        Ok(Self(if negative { -cents } else { cents }))
    }

    /// Accept a floating-point amount (collaborator tables store REAL).
    ///
    /// Fails when the value is not finite or carries a sub-cent residue
    /// beyond binary representation noise.
    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(ReconcileError::InvalidAmount(format!("{value} is not finite")));
        }
        let scaled = value * 100.0;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > F64_CENT_TOLERANCE {
            return Err(ReconcileError::InvalidAmount(format!(
                "{value} is not representable at two decimals"
            )));
        }
        if rounded.abs() >= i64::MAX as f64 {
            return Err(ReconcileError::InvalidAmount(format!("{value} is out of range")));
        }
        Ok(Self(rounded as i64))
    }

    /// Multiply by an integer count (e.g. a denomination by its quantity).
    pub fn times(self, factor: i64) -> Result<Self> {
        self.0.checked_mul(factor).map(Self).ok_or_else(|| {
            ReconcileError::InvalidAmount(format!("{self} x {factor} overflows"))
        })
    }

    /// `self + rhs`; overflow is an `InvalidAmount`, never a wrap.
    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0.checked_add(rhs.0).map(Self).ok_or_else(|| {
            ReconcileError::InvalidAmount(format!("{self} + {rhs} overflows"))
        })
    }

    /// `self - rhs`; overflow is an `InvalidAmount`, never a wrap.
    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0.checked_sub(rhs.0).map(Self).ok_or_else(|| {
            ReconcileError::InvalidAmount(format!("{self} - {rhs} overflows"))
        })
    }

    /// Sum of `amounts`, failing on the first overflowing step.
    pub fn checked_sum<I>(amounts: I) -> Result<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts.into_iter().try_fold(Self::ZERO, Self::checked_add)
    }

    /// Render with `decimals` fractional digits (0..=2), rounding half-up on
    /// the magnitude. Two decimals is exact and never rounds.
    pub fn format_with(self, decimals: u8) -> String {
        let decimals = u32::from(decimals.min(2));
        let divisor = 10u64.pow(2 - decimals);
        let magnitude = self.0.unsigned_abs();
        let rounded = (magnitude + divisor / 2) / divisor;
        let sign = if self.0 < 0 && rounded != 0 { "-" } else { "" };

        if decimals == 0 {
            return format!("{sign}{rounded}");
        }
        let scale = 10u64.pow(decimals);
        format!(
            "{sign}{}.{:0width$}",
            rounded / scale,
            rounded % scale,
            width = decimals as usize
        )
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_with(2))
    }
}

impl FromStr for MoneyAmount {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MoneyAmount {
    type Error = ReconcileError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MoneyAmount> for String {
    fn from(value: MoneyAmount) -> Self {
        value.to_string()
    }
}
