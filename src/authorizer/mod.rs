//! Transaction authorization against per-account credit limits.
//!
//! Each authorization runs in its own unit of work: lock the account's limit
//! row, check the requested OTR against the tenor's limit, rescale every
//! tenor limit, record the transaction and commit. Concurrent requests for
//! one account serialize on the row lock; different accounts never contend.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::Amount;
use crate::model::{AccountId, NewTransaction, Tenor, Transaction, now_millis};
use crate::store::{Storage, UnitOfWork};

mod discount;
pub use discount::Discount;

mod error;
pub use error::AuthorizeError;

/// Authorizes installment transactions against the limits in `S`.
pub struct Authorizer<S> {
    storage: S,
}

/// Outcome counts of [`Authorizer::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub authorized: usize,
    /// Rejected by a business rule.
    pub rejected: usize,
    /// Infrastructure or provisioning failures.
    pub failed: usize,
}

/// Public API
impl<S: Storage> Authorizer<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Authorize a transaction, deducting the account's limit and recording
    /// the transaction atomically.
    ///
    /// On error nothing is persisted and any lock taken is released.
    pub async fn create_transaction(
        &self,
        request: NewTransaction,
    ) -> Result<Transaction, AuthorizeError> {
        let account = request.account_id;
        let months = request.installment_months;
        let otr = request.otr;

        let result = self.authorize(request).await;
        Self::log_result(account, months, otr, &result);
        result
    }
}

impl<S: Storage + 'static> Authorizer<S> {
    /// Authorize every request of the stream, each on its own task.
    ///
    /// `deadline` bounds each request; a request past it is abandoned and its
    /// unit of work rolled back.
    pub async fn run(
        self: Arc<Self>,
        mut stream: impl Stream<Item = NewTransaction> + Unpin,
        deadline: Duration,
    ) -> RunSummary {
        let mut tasks = JoinSet::new();
        while let Some(request) = stream.next().await {
            let authorizer = Arc::clone(&self);
            tasks.spawn(async move {
                let account = request.account_id;
                match tokio::time::timeout(deadline, authorizer.create_transaction(request)).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(account, ?deadline, "transaction abandoned");
                        Err(AuthorizeError::DeadlineExceeded(deadline))
                    }
                }
            });
        }

        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => summary.authorized += 1,
                Ok(Err(e)) if e.is_client_error() => summary.rejected += 1,
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    warn!(reason = %e, "authorization task failed");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

/// Private API
impl<S: Storage> Authorizer<S> {
    /// Small helper to log `create_transaction` results
    fn log_result(
        account: AccountId,
        months: i64,
        otr: Amount,
        result: &Result<Transaction, AuthorizeError>,
    ) {
        match result {
            Ok(tx) => {
                info!(
                    account = %account,
                    tenor = %tx.tenor,
                    otr = %otr,
                    tx = %tx.id,
                    "transaction authorized"
                );
            }
            Err(e) if e.is_client_error() => {
                info!(
                    account = %account,
                    months = %months,
                    otr = %otr,
                    reason = %e,
                    "transaction rejected"
                );
            }
            Err(e) => {
                warn!(
                    account = %account,
                    months = %months,
                    otr = %otr,
                    reason = %e,
                    "transaction failed"
                );
            }
        }
    }

    /// Validate the request, then run it in a fresh unit of work:
    /// - Commit on success
    /// - Roll back on any failure after `begin`
    async fn authorize(&self, request: NewTransaction) -> Result<Transaction, AuthorizeError> {
        // rejected before any lock is taken
        let tenor = Tenor::try_from(request.installment_months)?;
        if !request.otr.is_positive() {
            return Err(AuthorizeError::InvalidAmount(request.otr));
        }

        let mut unit = self
            .storage
            .begin()
            .await
            .map_err(AuthorizeError::StorageUnavailable)?;

        let applied = Self::apply(&mut unit, request, tenor).await;
        match applied {
            Ok(transaction) => {
                unit.commit()
                    .await
                    .map_err(AuthorizeError::StorageUnavailable)?;
                Ok(transaction)
            }
            Err(e) => {
                if let Err(rollback) = unit.rollback().await {
                    // the unit is gone either way; dropping it rolled back
                    warn!(reason = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Apply a transaction inside `unit`:
    /// - Lock the account's limit row
    /// - Ensure the tenor's limit covers the OTR
    /// - Rescale all four limits by the remaining fraction of that tenor
    /// - Write the limits back and insert the transaction
    async fn apply(
        unit: &mut S::Unit,
        request: NewTransaction,
        tenor: Tenor,
    ) -> Result<Transaction, AuthorizeError> {
        let account = request.account_id;
        let otr = request.otr;
        let now = now_millis();

        let mut limits = unit.limits();
        let mut row = limits
            .get_by_account(account, true)
            .await
            .map_err(AuthorizeError::from_locked_read)?;

        let available = row.limit(tenor);
        let discount = Discount::after_consuming(available, otr).ok_or(
            AuthorizeError::InsufficientLimit {
                account,
                tenor,
                available,
                requested: otr,
            },
        )?;

        discount.apply_all(&mut row);
        row.updated_at = now;
        debug!(
            account,
            %tenor,
            discount = discount.as_f64(),
            "limits rescaled"
        );

        limits
            .update(&row)
            .await
            .map_err(AuthorizeError::Internal)?;
        drop(limits);

        let mut transaction = Transaction::from_request(request, tenor, now);
        let id = unit
            .ledger()
            .insert(&transaction)
            .await
            .map_err(AuthorizeError::Internal)?;
        transaction.id = id;

        Ok(transaction)
    }
}
