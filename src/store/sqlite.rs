//! SQLite storage backend.
//!
//! SQLite has no row locks. A locking read first issues a no-op `UPDATE` of
//! the row, which takes the database write lock for the rest of the unit.
//! This gives per-account mutual exclusion at the price of also serializing
//! units on different accounts. Waiting is bounded by the busy timeout.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite};
use tracing::debug;

use super::error::is_busy;
use super::{LimitStore, Storage, StoreError, TransactionLedger, UnitOfWork, ensure_non_negative};
use crate::Amount;
use crate::model::{AccountId, AccountLimit, Tenor, Transaction, TxId, now_millis};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS account_limits (
        account_limit_id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL,
        account_limit_1_m INTEGER NOT NULL CHECK (account_limit_1_m >= 0),
        account_limit_2_m INTEGER NOT NULL CHECK (account_limit_2_m >= 0),
        account_limit_3_m INTEGER NOT NULL CHECK (account_limit_3_m >= 0),
        account_limit_4_m INTEGER NOT NULL CHECK (account_limit_4_m >= 0),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_account_limits_live
    ON account_limits(account_id) WHERE deleted_at IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        transaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id INTEGER NOT NULL,
        contact_number TEXT NOT NULL,
        otr INTEGER NOT NULL CHECK (otr > 0),
        installment_months INTEGER NOT NULL CHECK (installment_months BETWEEN 1 AND 4),
        admin_fee INTEGER NOT NULL,
        total_installment INTEGER NOT NULL,
        total_interest INTEGER NOT NULL,
        asset_name TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_account
    ON transactions(account_id)
    "#,
];

const SELECT_LIMIT: &str = r#"
    SELECT
        account_limit_id,
        account_id,
        account_limit_1_m,
        account_limit_2_m,
        account_limit_3_m,
        account_limit_4_m,
        created_at,
        updated_at,
        deleted_at
    FROM account_limits
    WHERE account_id = ?
        AND deleted_at IS NULL
"#;

/// Storage in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) the database at `path` and ensure the schema.
    pub async fn connect(
        path: impl AsRef<Path>,
        lock_timeout: Duration,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(lock_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(lock_timeout)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init().await?;
        Ok(storage)
    }

    async fn init(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    type Unit = SqliteUnit;

    async fn begin(&self) -> Result<SqliteUnit, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(SqliteUnit {
            tx,
            locked: HashSet::new(),
        })
    }
}

/// Unit of work over one SQLite transaction.
///
/// Dropping it without a commit makes sqlx roll the transaction back before
/// the connection returns to the pool.
pub struct SqliteUnit {
    tx: sqlx::Transaction<'static, Sqlite>,
    locked: HashSet<AccountId>,
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    fn limits(&mut self) -> Box<dyn LimitStore + '_> {
        Box::new(SqliteLimits {
            conn: &mut *self.tx,
            locked: &mut self.locked,
        })
    }

    fn ledger(&mut self) -> Box<dyn TransactionLedger + '_> {
        Box::new(SqliteLedger { conn: &mut *self.tx })
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

struct SqliteLimits<'a> {
    conn: &'a mut SqliteConnection,
    locked: &'a mut HashSet<AccountId>,
}

fn limit_from_row(row: &SqliteRow) -> Result<AccountLimit, sqlx::Error> {
    Ok(AccountLimit {
        id: row.try_get("account_limit_id")?,
        account_id: row.try_get("account_id")?,
        limits: [
            Amount::from_scaled(row.try_get("account_limit_1_m")?),
            Amount::from_scaled(row.try_get("account_limit_2_m")?),
            Amount::from_scaled(row.try_get("account_limit_3_m")?),
            Amount::from_scaled(row.try_get("account_limit_4_m")?),
        ],
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[async_trait]
impl LimitStore for SqliteLimits<'_> {
    async fn get_by_account(
        &mut self,
        account: AccountId,
        for_update: bool,
    ) -> Result<AccountLimit, StoreError> {
        if for_update && !self.locked.contains(&account) {
            sqlx::query(
                r#"
                UPDATE account_limits
                SET account_id = account_id
                WHERE account_id = ?
                    AND deleted_at IS NULL
                "#,
            )
            .bind(account)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| {
                if is_busy(&e) {
                    StoreError::LockTimeout(account)
                } else {
                    StoreError::Database(e)
                }
            })?;
            debug!(account, "limit row locked");
            self.locked.insert(account);
        }

        let row = sqlx::query(SELECT_LIMIT)
            .bind(account)
            .fetch_optional(&mut *self.conn)
            .await?;

        match row {
            Some(row) => Ok(limit_from_row(&row)?),
            None => Err(StoreError::NotFound(account)),
        }
    }

    async fn update(&mut self, limit: &AccountLimit) -> Result<(), StoreError> {
        let account = limit.account_id;
        if !self.locked.contains(&account) {
            return Err(StoreError::NotLocked(account));
        }
        ensure_non_negative(limit)?;

        let result = sqlx::query(
            r#"
            UPDATE account_limits
            SET account_limit_1_m = ?,
                account_limit_2_m = ?,
                account_limit_3_m = ?,
                account_limit_4_m = ?,
                updated_at = ?
            WHERE account_id = ?
                AND deleted_at IS NULL
            "#,
        )
        .bind(limit.limits[0].scaled())
        .bind(limit.limits[1].scaled())
        .bind(limit.limits[2].scaled())
        .bind(limit.limits[3].scaled())
        .bind(limit.updated_at)
        .bind(account)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(account));
        }
        Ok(())
    }

    async fn create(&mut self, limit: &AccountLimit) -> Result<i64, StoreError> {
        let account = limit.account_id;
        ensure_non_negative(limit)?;

        let now = now_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO account_limits (
                account_id,
                account_limit_1_m,
                account_limit_2_m,
                account_limit_3_m,
                account_limit_4_m,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account)
        .bind(limit.limits[0].scaled())
        .bind(limit.limits[1].scaled())
        .bind(limit.limits[2].scaled())
        .bind(limit.limits[3].scaled())
        .bind(now)
        .bind(now)
        .execute(&mut *self.conn)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(account))
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct SqliteLedger<'a> {
    conn: &'a mut SqliteConnection,
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, sqlx::Error> {
    let months: i64 = row.try_get("installment_months")?;
    let tenor = Tenor::try_from(months).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(Transaction {
        id: row.try_get("transaction_id")?,
        account_id: row.try_get("account_id")?,
        contact_number: row.try_get("contact_number")?,
        otr: Amount::from_scaled(row.try_get("otr")?),
        tenor,
        admin_fee: Amount::from_scaled(row.try_get("admin_fee")?),
        total_installment: Amount::from_scaled(row.try_get("total_installment")?),
        total_interest: Amount::from_scaled(row.try_get("total_interest")?),
        asset_name: row.try_get("asset_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TransactionLedger for SqliteLedger<'_> {
    async fn insert(&mut self, transaction: &Transaction) -> Result<TxId, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                account_id,
                contact_number,
                otr,
                installment_months,
                admin_fee,
                total_installment,
                total_interest,
                asset_name,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.account_id)
        .bind(transaction.contact_number.as_str())
        .bind(transaction.otr.scaled())
        .bind(transaction.tenor.months())
        .bind(transaction.admin_fee.scaled())
        .bind(transaction.total_installment.scaled())
        .bind(transaction.total_interest.scaled())
        .bind(transaction.asset_name.as_str())
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_by_account(
        &mut self,
        account: AccountId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                transaction_id,
                account_id,
                contact_number,
                otr,
                installment_months,
                admin_fee,
                total_installment,
                total_interest,
                asset_name,
                created_at,
                updated_at
            FROM transactions
            WHERE account_id = ?
            ORDER BY transaction_id
            "#,
        )
        .bind(account)
        .fetch_all(&mut *self.conn)
        .await?;

        let transactions = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<_, _>>()?;
        Ok(transactions)
    }
}
