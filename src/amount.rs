use std::fmt;

/// Fixed-point decimal with 4 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Amount(i64);

impl Amount {
    const SCALE: i64 = 10_000;

    pub const ZERO: Amount = Amount(0);

    /// Round to 4 decimal places; `None` if `value` is not finite or does not
    /// fit the scaled representation.
    pub fn from_float(value: f64) -> Option<Self> {
        let scaled = (value * Self::SCALE as f64).round();
        // i64::MAX as f64 rounds up to 2^63, which itself does not fit
        if !scaled.is_finite() || scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
            return None;
        }
        Some(Amount(scaled as i64))
    }

    pub fn from_scaled(value: i64) -> Self {
        Amount(value)
    }

    /// Whole currency units, e.g. `Amount::from_units(1_000_000)`.
    pub fn from_units(units: i64) -> Self {
        Amount(units * Self::SCALE)
    }

    /// Raw scaled representation, as persisted.
    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiply by the ratio `numerator / denominator`, rounding toward zero.
    ///
    /// The intermediate product is computed in 128 bits, so the result is exact
    /// up to the final truncation. Returns `None` for a zero denominator.
    pub fn mul_ratio(self, numerator: Amount, denominator: Amount) -> Option<Amount> {
        if denominator.0 == 0 {
            return None;
        }
        let product = self.0 as i128 * numerator.0 as i128;
        let value = product / denominator.0 as i128;
        i64::try_from(value).ok().map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let whole = abs / Self::SCALE;
        let frac = abs % Self::SCALE;
        write!(f, "{sign}{whole}.{frac:04}")
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}
