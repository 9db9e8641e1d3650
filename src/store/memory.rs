//! In-process storage backend.
//!
//! Committed state sits behind one short-lived lock and is only ever replaced
//! at commit, so readers see a unit's limit writes and ledger rows together or
//! not at all. Row locks are per account: units locking different accounts
//! never wait on each other.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::{LimitStore, Storage, StoreError, TransactionLedger, UnitOfWork, ensure_non_negative};
use crate::model::{AccountId, AccountLimit, Transaction, TxId, now_millis};

#[derive(Debug, Default)]
struct Committed {
    limits: HashMap<AccountId, AccountLimit>,
    ledger: BTreeMap<TxId, Transaction>,
}

#[derive(Debug, Default)]
struct Shared {
    committed: RwLock<Committed>,
    row_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    /// Auto-increment counters; ids taken by rolled back units are not reused.
    last_limit_id: AtomicI64,
    last_tx_id: AtomicI64,
}

impl Shared {
    fn row_lock(self: &Arc<Self>, account: AccountId) -> (RowLockRef, Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(account).or_default());
        let lock_ref = RowLockRef {
            shared: Arc::clone(self),
            account,
            lock: Some(Arc::clone(&lock)),
        };
        (lock_ref, lock)
    }
}

/// Interest in an account's row lock, waiting for it or holding it.
///
/// The last reference to go removes the lock from the shared map, so the map
/// only ever holds accounts that some unit is using.
#[derive(Debug)]
struct RowLockRef {
    shared: Arc<Shared>,
    account: AccountId,
    lock: Option<Arc<tokio::sync::Mutex<()>>>,
}

impl Drop for RowLockRef {
    fn drop(&mut self) {
        let mut locks = self
            .shared
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = self.lock.take() {
            // one reference in the map, one here
            let last = Arc::strong_count(&lock) == 2;
            drop(lock);
            if last {
                locks.remove(&self.account);
            }
        }
    }
}

/// A held row lock. Fields drop in order: the guard is released before the
/// reference is given up.
#[derive(Debug)]
struct RowGuard {
    _guard: OwnedMutexGuard<()>,
    _lock: RowLockRef,
}

/// Storage kept in process memory, shareable across tasks by cloning.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl MemoryStorage {
    /// `lock_timeout` bounds how long a locking read waits for a row.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lock_timeout,
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, StoreError> {
        Ok(MemoryUnit {
            shared: Arc::clone(&self.shared),
            lock_timeout: self.lock_timeout,
            held: HashMap::new(),
            staged_limits: HashMap::new(),
            created: HashSet::new(),
            staged_ledger: Vec::new(),
        })
    }
}

/// Unit of work over [`MemoryStorage`].
///
/// Writes are staged locally and published at commit. Row locks are owned
/// guards, so dropping the unit releases them on every exit path.
#[derive(Debug)]
pub struct MemoryUnit {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    held: HashMap<AccountId, RowGuard>,
    staged_limits: HashMap<AccountId, AccountLimit>,
    created: HashSet<AccountId>,
    staged_ledger: Vec<Transaction>,
}

impl MemoryUnit {
    async fn lock_row(&mut self, account: AccountId) -> Result<(), StoreError> {
        if self.held.contains_key(&account) {
            return Ok(());
        }
        let (lock_ref, lock) = self.shared.row_lock(account);
        let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(account))?;
        debug!(account, "limit row locked");
        self.held.insert(
            account,
            RowGuard {
                _guard: guard,
                _lock: lock_ref,
            },
        );
        Ok(())
    }

    /// Live row as seen by this unit: its own staged writes first.
    fn read(&self, account: AccountId) -> Result<AccountLimit, StoreError> {
        if let Some(row) = self.staged_limits.get(&account) {
            return Ok(row.clone());
        }
        let committed = self
            .shared
            .committed
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        committed
            .limits
            .get(&account)
            .filter(|row| !row.is_deleted())
            .cloned()
            .ok_or(StoreError::NotFound(account))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    fn limits(&mut self) -> Box<dyn LimitStore + '_> {
        Box::new(MemoryLimits { unit: self })
    }

    fn ledger(&mut self) -> Box<dyn TransactionLedger + '_> {
        Box::new(MemoryLedger { unit: self })
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let mut committed = self
            .shared
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        // validate everything before publishing anything
        for account in &self.created {
            if committed
                .limits
                .get(account)
                .is_some_and(|row| !row.is_deleted())
            {
                return Err(StoreError::AlreadyExists(*account));
            }
        }

        for (account, row) in self.staged_limits.drain() {
            committed.limits.insert(account, row);
        }
        for transaction in self.staged_ledger.drain(..) {
            committed.ledger.insert(transaction.id, transaction);
        }
        drop(committed);

        // row locks are released only once the new state is visible
        self.held.clear();
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryLimits<'a> {
    unit: &'a mut MemoryUnit,
}

#[async_trait]
impl LimitStore for MemoryLimits<'_> {
    async fn get_by_account(
        &mut self,
        account: AccountId,
        for_update: bool,
    ) -> Result<AccountLimit, StoreError> {
        if for_update {
            self.unit.lock_row(account).await?;
        }
        self.unit.read(account)
    }

    async fn update(&mut self, limit: &AccountLimit) -> Result<(), StoreError> {
        let account = limit.account_id;
        if !self.unit.held.contains_key(&account) {
            return Err(StoreError::NotLocked(account));
        }
        ensure_non_negative(limit)?;

        let mut row = self.unit.read(account)?;
        row.limits = limit.limits;
        row.updated_at = limit.updated_at;
        self.unit.staged_limits.insert(account, row);
        Ok(())
    }

    async fn create(&mut self, limit: &AccountLimit) -> Result<i64, StoreError> {
        let account = limit.account_id;
        ensure_non_negative(limit)?;
        match self.unit.read(account) {
            Ok(_) => return Err(StoreError::AlreadyExists(account)),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let now = now_millis();
        let mut row = limit.clone();
        row.id = self.unit.shared.last_limit_id.fetch_add(1, Ordering::SeqCst) + 1;
        row.created_at = now;
        row.updated_at = now;
        row.deleted_at = None;

        let id = row.id;
        self.unit.staged_limits.insert(account, row);
        self.unit.created.insert(account);
        Ok(id)
    }
}

struct MemoryLedger<'a> {
    unit: &'a mut MemoryUnit,
}

#[async_trait]
impl TransactionLedger for MemoryLedger<'_> {
    async fn insert(&mut self, transaction: &Transaction) -> Result<TxId, StoreError> {
        let id = self.unit.shared.last_tx_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut row = transaction.clone();
        row.id = id;
        self.unit.staged_ledger.push(row);
        Ok(id)
    }

    async fn list_by_account(
        &mut self,
        account: AccountId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let committed = self
            .unit
            .shared
            .committed
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<Transaction> = committed
            .ledger
            .values()
            .chain(self.unit.staged_ledger.iter())
            .filter(|tx| tx.account_id == account)
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.id);
        Ok(rows)
    }
}
