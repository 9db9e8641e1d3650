use crate::Amount;
use crate::model::{AccountLimit, Tenor};

/// Fraction of a tenor's limit left after consuming `otr` from it:
/// `(limit - otr) / limit`, within `[0, 1)`.
///
/// The same factor rescales every tenor, not only the consumed one: tenors
/// share one exposure budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discount {
    remaining: Amount,
    limit: Amount,
}

impl Discount {
    /// `None` unless `0 < otr <= limit`.
    pub fn after_consuming(limit: Amount, otr: Amount) -> Option<Self> {
        if !otr.is_positive() || otr > limit {
            return None;
        }
        Some(Self {
            remaining: limit - otr,
            limit,
        })
    }

    pub fn apply(&self, amount: Amount) -> Amount {
        // the ratio is below one, so the product always fits
        amount
            .mul_ratio(self.remaining, self.limit)
            .unwrap_or(Amount::ZERO)
    }

    /// Rescale all four limits of a row in place.
    pub fn apply_all(&self, row: &mut AccountLimit) {
        for tenor in Tenor::ALL {
            row.set_limit(tenor, self.apply(row.limit(tenor)));
        }
    }

    /// Approximate factor, for logging.
    pub fn as_f64(&self) -> f64 {
        self.remaining.scaled() as f64 / self.limit.scaled() as f64
    }
}
