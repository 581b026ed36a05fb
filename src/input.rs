//! CSV loading for the transaction table and the product/store reference tables.
//!
//! Rows with an empty required field are dropped and counted (simple null-row
//! removal). Any other malformed value is a hard error with its line number.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const TRANSACTION_DATE_COLUMN: &str = "transaction_date";
pub const TRANSACTION_STORE_COLUMN: &str = "internal_store_id";
pub const TRANSACTION_PRODUCT_COLUMN: &str = "internal_product_id";
pub const TRANSACTION_QUANTITY_COLUMN: &str = "quantity";
pub const PRODUCT_ID_COLUMN: &str = "produto";
pub const STORE_ID_COLUMN: &str = "pdv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub store_id: String,
    pub product_id: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_read: u64,
    pub rows_loaded: u64,
    pub null_rows_dropped: u64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("failed to parse field {field} value '{value}' on line {line}")]
    ParseField {
        field: &'static str,
        value: String,
        line: u64,
    },
}

struct TransactionColumns {
    date: usize,
    store: usize,
    product: usize,
    quantity: usize,
}

pub fn load_transactions(path: &Path) -> Result<(Vec<Transaction>, LoadReport), LoadError> {
    let file = open(path)?;
    let out = read_transactions(file)?;
    info!(
        component = "input",
        event = "input.transactions.loaded",
        path = %path.display(),
        rows_read = out.1.rows_read,
        rows_loaded = out.1.rows_loaded,
        null_rows_dropped = out.1.null_rows_dropped
    );
    Ok(out)
}

pub fn read_transactions<R: Read>(
    reader: R,
) -> Result<(Vec<Transaction>, LoadReport), LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let columns = TransactionColumns {
        date: column_index(&headers, TRANSACTION_DATE_COLUMN)?,
        store: column_index(&headers, TRANSACTION_STORE_COLUMN)?,
        product: column_index(&headers, TRANSACTION_PRODUCT_COLUMN)?,
        quantity: column_index(&headers, TRANSACTION_QUANTITY_COLUMN)?,
    };

    let mut report = LoadReport::default();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        report.rows_read += 1;
        match parse_transaction(&record, &columns)? {
            Some(tx) => rows.push(tx),
            None => report.null_rows_dropped += 1,
        }
    }
    report.rows_loaded = rows.len() as u64;

    if report.null_rows_dropped > 0 {
        warn!(
            component = "input",
            event = "input.null_rows_dropped",
            null_rows_dropped = report.null_rows_dropped
        );
    }

    Ok((rows, report))
}

/// Loads the distinct, non-empty ids of one reference table column.
pub fn load_reference_ids(path: &Path, column: &'static str) -> Result<Vec<String>, LoadError> {
    let file = open(path)?;
    let ids = read_reference_ids(file, column)?;
    info!(
        component = "input",
        event = "input.reference.loaded",
        path = %path.display(),
        column,
        ids = ids.len()
    );
    Ok(ids)
}

pub fn read_reference_ids<R: Read>(
    reader: R,
    column: &'static str,
) -> Result<Vec<String>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let idx = column_index(&headers, column)?;

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record?;
        match record.get(idx) {
            Some(raw) if !raw.is_empty() => ids.push(raw.to_string()),
            _ => {}
        }
    }
    ids.sort();
    ids.dedup();
    Ok(ids)
}

fn open(path: &Path) -> Result<fs::File, LoadError> {
    fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn column_index(headers: &StringRecord, column: &'static str) -> Result<usize, LoadError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or(LoadError::MissingColumn(column))
}

fn parse_transaction(
    record: &StringRecord,
    columns: &TransactionColumns,
) -> Result<Option<Transaction>, LoadError> {
    let fields = [
        record.get(columns.date).unwrap_or_default(),
        record.get(columns.store).unwrap_or_default(),
        record.get(columns.product).unwrap_or_default(),
        record.get(columns.quantity).unwrap_or_default(),
    ];
    if fields.iter().any(|f| f.is_empty() || is_null_token(f)) {
        return Ok(None);
    }
    let line = record.position().map(|p| p.line()).unwrap_or_default();

    let date = parse_date(fields[0]).ok_or_else(|| LoadError::ParseField {
        field: TRANSACTION_DATE_COLUMN,
        value: fields[0].to_string(),
        line,
    })?;
    let quantity = fields[3]
        .parse::<f64>()
        .ok()
        .filter(|q| q.is_finite())
        .ok_or_else(|| LoadError::ParseField {
            field: TRANSACTION_QUANTITY_COLUMN,
            value: fields[3].to_string(),
            line,
        })?;

    Ok(Some(Transaction {
        date,
        store_id: fields[1].to_string(),
        product_id: fields[2].to_string(),
        quantity,
    }))
}

fn is_null_token(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "null" | "nan" | "none" | "na"
    )
}

/// Accepts `YYYY-MM-DD` with an optional time part separated by a space or `T`.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.split([' ', 'T']).next()?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
