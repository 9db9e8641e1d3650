use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use kredit_ledger::seed::seed_limits;
use kredit_ledger::store::MemoryStorage;
use kredit_ledger::{AccountId, AccountLimit, Amount, Authorizer, NewTransaction};
use tokio::runtime::Runtime;

/// Generates transaction requests spread round-robin over accounts.
///
/// Every request consumes 1 unit on tenor 4, so with the limits seeded by
/// [`limits`] none of them is rejected.
pub struct RequestGenerator {
    num_accounts: AccountId,
    remaining: u64,
    next_account: AccountId,
}

impl RequestGenerator {
    pub fn new(num_accounts: AccountId, total: u64) -> Self {
        Self {
            num_accounts,
            remaining: total,
            next_account: 1,
        }
    }
}

impl Iterator for RequestGenerator {
    type Item = NewTransaction;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let account = self.next_account;
        self.next_account = self.next_account % self.num_accounts + 1;

        Some(NewTransaction {
            account_id: account,
            contact_number: "081200000000".to_string(),
            otr: Amount::from_units(1),
            installment_months: 4,
            admin_fee: Amount::from_units(1),
            total_installment: Amount::from_units(2),
            total_interest: Amount::ZERO,
            asset_name: "bench".to_string(),
        })
    }
}

fn limits(num_accounts: AccountId) -> Vec<AccountLimit> {
    (1..=num_accounts)
        .map(|account| AccountLimit::new(account, [Amount::from_units(1_000_000_000); 4]))
        .collect()
}

async fn setup(num_accounts: AccountId) -> Arc<Authorizer<MemoryStorage>> {
    let storage = MemoryStorage::new(Duration::from_secs(5));
    seed_limits(&storage, limits(num_accounts))
        .await
        .expect("seeding failed");
    Arc::new(Authorizer::new(storage))
}

fn bench_sequential(c: &mut Criterion) {
    let runtime = Runtime::new().expect("failed to build runtime");
    let mut group = c.benchmark_group("sequential");

    for count in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                runtime.block_on(async {
                    let authorizer = setup(10).await;
                    for request in RequestGenerator::new(10, count) {
                        let _ = black_box(authorizer.create_transaction(request).await);
                    }
                })
            });
        });
    }

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    let runtime = Runtime::new().expect("failed to build runtime");
    let mut group = c.benchmark_group("concurrent");

    // one hot account versus many independent ones
    for (accounts, total) in [(1, 10_000u64), (100, 10_000), (1_000, 10_000)] {
        let label = format!("{accounts}a_{total}tx");
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(accounts, total),
            |b, &(accounts, total)| {
                b.iter(|| {
                    runtime.block_on(async {
                        let authorizer = setup(accounts).await;
                        let requests = tokio_stream::iter(RequestGenerator::new(accounts, total));
                        black_box(authorizer.run(requests, Duration::from_secs(30)).await)
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_sequential, bench_concurrent);
criterion_main!(benches);
