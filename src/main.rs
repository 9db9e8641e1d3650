use std::env;
use std::error::Error;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use kredit_ledger::Authorizer;
use kredit_ledger::config::Config;
use kredit_ledger::csv::{read_limits, read_requests, write_limits};
use kredit_ledger::seed::seed_limits;
use kredit_ledger::store::{MemoryStorage, SqliteStorage, Storage, snapshot_limits};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let (Some(limits_path), Some(requests_path)) = (args.next(), args.next()) else {
        error!("usage: kredit-ledger <limits.csv> <requests.csv>");
        return ExitCode::FAILURE;
    };

    for path in [&limits_path, &requests_path] {
        if !path.ends_with(".csv") {
            warn!(path, "input file seems to not be a csv file");
        }
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &config.database {
        Some(path) => {
            match SqliteStorage::connect(path, config.lock_timeout, config.max_connections).await {
                Ok(storage) => process(storage, &config, limits_path, requests_path).await,
                Err(e) => Err(e.into()),
            }
        }
        None => {
            let storage = MemoryStorage::new(config.lock_timeout);
            process(storage, &config, limits_path, requests_path).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Seed limits, authorize every request, then print the resulting limits.
async fn process<S: Storage + 'static>(
    storage: S,
    config: &Config,
    limits_path: String,
    requests_path: String,
) -> Result<(), Box<dyn Error>> {
    let mut accounts = Vec::new();
    let mut rows = Vec::new();
    for result in read_limits(&limits_path)? {
        match result {
            Ok(row) => {
                accounts.push(row.account_id);
                rows.push(row);
            }
            Err(e) => warn!("{e}"),
        }
    }

    if config.seed {
        seed_limits(&storage, rows).await?;
    }

    let requests = read_requests(requests_path)?;
    let (tx_sender, tx_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in requests {
            match result {
                Ok(request) => {
                    if tx_sender.send(request).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let authorizer = Arc::new(Authorizer::new(storage));
    let summary = Arc::clone(&authorizer)
        .run(ReceiverStream::new(tx_receiver), config.request_timeout)
        .await;
    info!(
        authorized = summary.authorized,
        rejected = summary.rejected,
        failed = summary.failed,
        "requests processed"
    );

    accounts.sort_unstable();
    accounts.dedup();
    let limits = snapshot_limits(authorizer.storage(), accounts).await?;
    write_limits(io::stdout().lock(), &limits)?;

    Ok(())
}
