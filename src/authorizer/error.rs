//! Error types for transaction authorization.

use std::time::Duration;

use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, InvalidTenor, Tenor};
use crate::store::StoreError;

/// Error returned by [`Authorizer::create_transaction`](super::Authorizer::create_transaction).
///
/// Every variant is scoped to one request; no partial state is ever persisted.
#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error(transparent)]
    InvalidTenor(#[from] InvalidTenor),

    #[error("otr must be positive, got {0}")]
    InvalidAmount(Amount),

    #[error("insufficient {tenor} limit for account {account}: available {available}, requested {requested}")]
    InsufficientLimit {
        account: AccountId,
        tenor: Tenor,
        available: Amount,
        requested: Amount,
    },

    #[error("account {0} has no credit limit provisioned")]
    NotFound(AccountId),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    #[error("internal storage failure: {0}")]
    Internal(#[source] StoreError),

    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl AuthorizeError {
    /// Business-rule rejection the client can correct (4xx class).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AuthorizeError::InvalidTenor(_)
                | AuthorizeError::InvalidAmount(_)
                | AuthorizeError::InsufficientLimit { .. }
        )
    }

    /// Infrastructure failure worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthorizeError::StorageUnavailable(_) | AuthorizeError::DeadlineExceeded(_)
        )
    }

    /// Classify a failure of the locked read.
    pub(super) fn from_locked_read(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(account) => AuthorizeError::NotFound(account),
            e if e.is_unavailable() => AuthorizeError::StorageUnavailable(e),
            e => AuthorizeError::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rules_are_client_errors() {
        assert!(AuthorizeError::InvalidTenor(InvalidTenor(5)).is_client_error());
        assert!(AuthorizeError::InvalidAmount(Amount::ZERO).is_client_error());
        assert!(
            AuthorizeError::InsufficientLimit {
                account: 1,
                tenor: Tenor::One,
                available: Amount::ZERO,
                requested: Amount::from_units(1),
            }
            .is_client_error()
        );
    }

    #[test]
    fn infrastructure_errors_are_not_client_errors() {
        assert!(!AuthorizeError::NotFound(1).is_client_error());
        assert!(!AuthorizeError::Internal(StoreError::NotLocked(1)).is_client_error());
        assert!(!AuthorizeError::StorageUnavailable(StoreError::LockTimeout(1)).is_client_error());
    }

    #[test]
    fn retryable_errors() {
        assert!(AuthorizeError::StorageUnavailable(StoreError::LockTimeout(1)).is_retryable());
        assert!(AuthorizeError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
        assert!(!AuthorizeError::NotFound(1).is_retryable());
        assert!(!AuthorizeError::InvalidAmount(Amount::ZERO).is_retryable());
    }

    #[test]
    fn locked_read_classification() {
        assert!(matches!(
            AuthorizeError::from_locked_read(StoreError::NotFound(4)),
            AuthorizeError::NotFound(4)
        ));
        assert!(matches!(
            AuthorizeError::from_locked_read(StoreError::LockTimeout(4)),
            AuthorizeError::StorageUnavailable(_)
        ));
        assert!(matches!(
            AuthorizeError::from_locked_read(StoreError::NegativeLimit(4)),
            AuthorizeError::Internal(_)
        ));
    }

    #[test]
    fn insufficient_limit_message() {
        let e = AuthorizeError::InsufficientLimit {
            account: 2,
            tenor: Tenor::Two,
            available: Amount::from_units(10),
            requested: Amount::from_units(11),
        };
        assert_eq!(
            e.to_string(),
            "insufficient 2m limit for account 2: available 10.0000, requested 11.0000"
        );
    }
}
