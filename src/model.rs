//! Core domain types for the credit-limit ledger.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::Amount;

/// Account identifier.
pub type AccountId = i64;

/// Ledger-assigned transaction identifier.
pub type TxId = i64;

/// Unix timestamp in milliseconds.
pub type Timestamp = i64;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Installment duration in months. Each tenor has its own credit limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tenor {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("installment months must be between 1 and 4, got {0}")]
pub struct InvalidTenor(pub i64);

impl Tenor {
    pub const ALL: [Tenor; 4] = [Tenor::One, Tenor::Two, Tenor::Three, Tenor::Four];

    pub fn months(self) -> i64 {
        self as i64
    }

    fn index(self) -> usize {
        self as usize - 1
    }
}

impl TryFrom<i64> for Tenor {
    type Error = InvalidTenor;

    fn try_from(months: i64) -> Result<Self, Self::Error> {
        match months {
            1 => Ok(Tenor::One),
            2 => Ok(Tenor::Two),
            3 => Ok(Tenor::Three),
            4 => Ok(Tenor::Four),
            other => Err(InvalidTenor(other)),
        }
    }
}

impl fmt::Display for Tenor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.months())
    }
}

/// Per-account credit limits, one per tenor.
///
/// Limits are only ever lowered by the authorizer; they are never negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLimit {
    /// Row id, assigned by the limit store on insert.
    pub id: i64,
    pub account_id: AccountId,
    pub limits: [Amount; 4],
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Soft-deleted rows are invisible to lookups.
    pub deleted_at: Option<Timestamp>,
}

impl AccountLimit {
    /// A fresh, not yet persisted limit row with the given nominal limits.
    pub fn new(account_id: AccountId, limits: [Amount; 4]) -> Self {
        Self {
            id: 0,
            account_id,
            limits,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    pub fn limit(&self, tenor: Tenor) -> Amount {
        self.limits[tenor.index()]
    }

    pub fn set_limit(&mut self, tenor: Tenor, amount: Amount) {
        self.limits[tenor.index()] = amount;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// An already validated request to finance an asset.
///
/// `installment_months` is kept raw; the authorizer rejects values outside
/// of the supported tenors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub contact_number: String,
    pub otr: Amount,
    pub installment_months: i64,
    pub admin_fee: Amount,
    pub total_installment: Amount,
    pub total_interest: Amount,
    pub asset_name: String,
}

/// An authorized transaction as recorded in the ledger. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TxId,
    pub account_id: AccountId,
    pub contact_number: String,
    pub otr: Amount,
    pub tenor: Tenor,
    pub admin_fee: Amount,
    pub total_installment: Amount,
    pub total_interest: Amount,
    pub asset_name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Transaction {
    /// Build the ledger row for a request. The id is assigned on insert.
    pub fn from_request(request: NewTransaction, tenor: Tenor, now: Timestamp) -> Self {
        Self {
            id: 0,
            account_id: request.account_id,
            contact_number: request.contact_number,
            otr: request.otr,
            tenor,
            admin_fee: request.admin_fee,
            total_installment: request.total_installment,
            total_interest: request.total_interest,
            asset_name: request.asset_name,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenor_from_months() {
        assert_eq!(Tenor::try_from(1), Ok(Tenor::One));
        assert_eq!(Tenor::try_from(4), Ok(Tenor::Four));
        assert_eq!(Tenor::try_from(0), Err(InvalidTenor(0)));
        assert_eq!(Tenor::try_from(5), Err(InvalidTenor(5)));
        assert_eq!(Tenor::try_from(-1), Err(InvalidTenor(-1)));
    }

    #[test]
    fn tenor_round_trips_months() {
        for tenor in Tenor::ALL {
            assert_eq!(Tenor::try_from(tenor.months()), Ok(tenor));
        }
        assert_eq!(Tenor::Three.to_string(), "3m");
    }

    #[test]
    fn account_limit_indexes_by_tenor() {
        let mut limit = AccountLimit::new(
            7,
            [
                Amount::from_units(1),
                Amount::from_units(2),
                Amount::from_units(3),
                Amount::from_units(4),
            ],
        );
        assert_eq!(limit.limit(Tenor::One), Amount::from_units(1));
        assert_eq!(limit.limit(Tenor::Four), Amount::from_units(4));

        limit.set_limit(Tenor::Two, Amount::ZERO);
        assert_eq!(limit.limits[1], Amount::ZERO);
        assert!(!limit.is_deleted());
    }

    #[test]
    fn transaction_from_request_copies_fields() {
        let request = NewTransaction {
            account_id: 3,
            contact_number: "0812".to_string(),
            otr: Amount::from_units(500),
            installment_months: 2,
            admin_fee: Amount::from_units(5),
            total_installment: Amount::from_units(520),
            total_interest: Amount::from_units(15),
            asset_name: "motorcycle".to_string(),
        };
        let tx = Transaction::from_request(request, Tenor::Two, 42);
        assert_eq!(tx.id, 0);
        assert_eq!(tx.account_id, 3);
        assert_eq!(tx.tenor, Tenor::Two);
        assert_eq!(tx.asset_name, "motorcycle");
        assert_eq!(tx.created_at, 42);
        assert_eq!(tx.updated_at, 42);
    }

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
