//! Persistence capabilities for account limits and the transaction ledger.
//!
//! All access goes through a [`UnitOfWork`]: one atomic transaction that hands
//! out a [`LimitStore`] and a [`TransactionLedger`] bound to it. Committing or
//! rolling back consumes the unit; dropping it without a commit rolls back.

use async_trait::async_trait;

use crate::model::{AccountId, AccountLimit, Transaction, TxId};

mod error;
pub use error::StoreError;

pub mod memory;
pub use memory::MemoryStorage;

pub mod sqlite;
pub use sqlite::SqliteStorage;

/// A storage backend able to open units of work.
#[async_trait]
pub trait Storage: Send + Sync {
    type Unit: UnitOfWork;

    /// Begin a new atomic unit of work.
    async fn begin(&self) -> Result<Self::Unit, StoreError>;
}

/// A single atomic transaction over the limit store and the ledger.
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    /// Limit store bound to this unit.
    fn limits(&mut self) -> Box<dyn LimitStore + '_>;

    /// Transaction ledger bound to this unit.
    fn ledger(&mut self) -> Box<dyn TransactionLedger + '_>;

    /// Publish every write made through this unit and release its locks.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every write made through this unit and release its locks.
    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LimitStore: Send {
    /// Read the live limit row of an account.
    ///
    /// With `for_update` the row is locked until the unit ends; concurrent
    /// locking reads of the same account wait for it.
    async fn get_by_account(
        &mut self,
        account: AccountId,
        for_update: bool,
    ) -> Result<AccountLimit, StoreError>;

    /// Overwrite the four limits and `updated_at` of a row previously read
    /// with `for_update` in this unit.
    async fn update(&mut self, limit: &AccountLimit) -> Result<(), StoreError>;

    /// Provision a new limit row, returning its row id.
    async fn create(&mut self, limit: &AccountLimit) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait TransactionLedger: Send {
    /// Append a transaction, returning its newly assigned id.
    async fn insert(&mut self, transaction: &Transaction) -> Result<TxId, StoreError>;

    /// Transactions of an account in id order.
    async fn list_by_account(&mut self, account: AccountId)
    -> Result<Vec<Transaction>, StoreError>;
}

/// Read the current limits of the given accounts in a throwaway unit.
///
/// Accounts without a live row are skipped.
pub async fn snapshot_limits<S: Storage>(
    storage: &S,
    accounts: impl IntoIterator<Item = AccountId>,
) -> Result<Vec<AccountLimit>, StoreError> {
    let mut unit = storage.begin().await?;
    let mut rows = Vec::new();
    {
        let mut limits = unit.limits();
        for account in accounts {
            match limits.get_by_account(account, false).await {
                Ok(row) => rows.push(row),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }
    unit.rollback().await?;
    Ok(rows)
}

/// Limits must never go negative.
fn ensure_non_negative(limit: &AccountLimit) -> Result<(), StoreError> {
    if limit.limits.iter().any(|amount| amount.is_negative()) {
        return Err(StoreError::NegativeLimit(limit.account_id));
    }
    Ok(())
}
