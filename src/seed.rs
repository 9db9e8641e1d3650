//! Idempotent provisioning of account limits.

use tracing::{debug, info};

use crate::model::AccountLimit;
use crate::store::{Storage, StoreError, UnitOfWork};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub inserted: usize,
    /// Accounts that already had a live limit row.
    pub skipped: usize,
}

/// Provision limit rows for accounts that have none, in a single unit of work.
///
/// Existing rows are left untouched. Any store failure rolls back the whole
/// seed.
pub async fn seed_limits<S: Storage>(
    storage: &S,
    rows: impl IntoIterator<Item = AccountLimit>,
) -> Result<SeedSummary, StoreError> {
    let mut unit = storage.begin().await?;
    let mut summary = SeedSummary::default();

    let mut limits = unit.limits();
    for row in rows {
        let account = row.account_id;
        match limits.get_by_account(account, false).await {
            Ok(_) => {
                debug!(account, "account limit exists, skipped");
                summary.skipped += 1;
            }
            Err(StoreError::NotFound(_)) => {
                limits.create(&row).await?;
                debug!(account, "account limit inserted");
                summary.inserted += 1;
            }
            Err(e) => return Err(e),
        }
    }
    drop(limits);

    unit.commit().await?;
    info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        "account limits seeded"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::store::MemoryStorage;
    use std::time::Duration;

    fn row(account: i64, units: i64) -> AccountLimit {
        AccountLimit::new(account, [Amount::from_units(units); 4])
    }

    #[tokio::test]
    async fn seeds_missing_rows() {
        let storage = MemoryStorage::new(Duration::from_secs(1));
        let summary = seed_limits(&storage, vec![row(1, 100), row(2, 200)])
            .await
            .unwrap();
        assert_eq!(summary, SeedSummary { inserted: 2, skipped: 0 });

        let mut unit = storage.begin().await.unwrap();
        let second = unit.limits().get_by_account(2, false).await.unwrap();
        assert_eq!(second.limits, [Amount::from_units(200); 4]);
    }

    #[tokio::test]
    async fn reseeding_keeps_existing_rows() {
        let storage = MemoryStorage::new(Duration::from_secs(1));
        seed_limits(&storage, vec![row(1, 100)]).await.unwrap();

        let summary = seed_limits(&storage, vec![row(1, 999), row(3, 300)])
            .await
            .unwrap();
        assert_eq!(summary, SeedSummary { inserted: 1, skipped: 1 });

        let mut unit = storage.begin().await.unwrap();
        let first = unit.limits().get_by_account(1, false).await.unwrap();
        assert_eq!(first.limits, [Amount::from_units(100); 4]);
    }

    #[tokio::test]
    async fn duplicate_accounts_in_one_seed_keep_the_first() {
        let storage = MemoryStorage::new(Duration::from_secs(1));
        let summary = seed_limits(&storage, vec![row(1, 100), row(1, 500)])
            .await
            .unwrap();
        assert_eq!(summary, SeedSummary { inserted: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn negative_limit_rolls_back_whole_seed() {
        let storage = MemoryStorage::new(Duration::from_secs(1));
        let result = seed_limits(&storage, vec![row(1, 100), row(2, -1)]).await;
        assert!(matches!(result, Err(StoreError::NegativeLimit(2))));

        let mut unit = storage.begin().await.unwrap();
        assert!(matches!(
            unit.limits().get_by_account(1, false).await,
            Err(StoreError::NotFound(1))
        ));
    }
}
