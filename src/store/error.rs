//! Error types for the limit store and transaction ledger.

use thiserror::Error;

use crate::model::AccountId;

/// SQLite primary result codes for a contended lock.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no account limit for account {0}")]
    NotFound(AccountId),

    #[error("account limit for account {0} already exists")]
    AlreadyExists(AccountId),

    #[error("timed out waiting for the limit lock of account {0}")]
    LockTimeout(AccountId),

    #[error("account limit {0} was not locked by this unit of work")]
    NotLocked(AccountId),

    #[error("account limit {0} would become negative")]
    NegativeLimit(AccountId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Infrastructure failure the caller may retry: lock contention,
    /// connectivity or pool exhaustion.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::LockTimeout(_) => true,
            StoreError::Database(e) => is_unavailable(e),
            _ => false,
        }
    }
}

pub(crate) fn is_busy(error: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = error else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        // extended codes carry the primary code in the low byte
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

fn is_unavailable(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    ) || is_busy(error)
}
