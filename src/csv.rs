use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, AccountLimit, NewTransaction};

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: {field} {value} is not a representable amount")]
    InvalidAmount {
        line: usize,
        field: &'static str,
        value: f64,
    },

    #[error("line {line}: account {account} has a negative limit")]
    NegativeLimit { line: usize, account: AccountId },

    #[error("failed to write row: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct LimitRow {
    account: AccountId,
    limit_1m: f64,
    limit_2m: f64,
    limit_3m: f64,
    limit_4m: f64,
}

#[derive(Debug, Deserialize)]
struct RequestRow {
    account: AccountId,
    contact_number: String,
    otr: f64,
    installment_months: i64,
    admin_fee: f64,
    total_installment: f64,
    total_interest: f64,
    asset_name: String,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    account: AccountId,
    limit_1m: String,
    limit_2m: String,
    limit_3m: String,
    limit_4m: String,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

fn amount(line: usize, field: &'static str, value: f64) -> Result<Amount, CsvError> {
    Amount::from_float(value).ok_or(CsvError::InvalidAmount { line, field, value })
}

/// Read nominal account limits from a csv file
pub fn read_limits(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<AccountLimit, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<LimitRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let limits = [
                amount(line, "limit_1m", row.limit_1m)?,
                amount(line, "limit_2m", row.limit_2m)?,
                amount(line, "limit_3m", row.limit_3m)?,
                amount(line, "limit_4m", row.limit_4m)?,
            ];
            if limits.iter().any(|amount| amount.is_negative()) {
                return Err(CsvError::NegativeLimit {
                    line,
                    account: row.account,
                });
            }
            Ok(AccountLimit::new(row.account, limits))
        }))
}

/// Read transaction requests from a csv file
pub fn read_requests(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<NewTransaction, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<RequestRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            Ok(NewTransaction {
                account_id: row.account,
                contact_number: row.contact_number,
                otr: amount(line, "otr", row.otr)?,
                installment_months: row.installment_months,
                admin_fee: amount(line, "admin_fee", row.admin_fee)?,
                total_installment: amount(line, "total_installment", row.total_installment)?,
                total_interest: amount(line, "total_interest", row.total_interest)?,
                asset_name: row.asset_name,
            })
        }))
}

/// Write account limits in csv format
pub fn write_limits<'a>(
    writer: impl io::Write,
    limits: impl IntoIterator<Item = &'a AccountLimit>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for limit in limits {
        let [limit_1m, limit_2m, limit_3m, limit_4m] = limit.limits.map(|a| a.to_string());
        writer.serialize(OutputRow {
            account: limit.account_id,
            limit_1m,
            limit_2m,
            limit_3m,
            limit_4m,
        })?;
    }

    writer.flush()?;
    Ok(())
}
