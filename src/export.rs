//! Forecast rendering: predict every dataset row, keep the target weeks and
//! write delimited text.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::dataset::Dataset;
use crate::features::FeatureError;
use crate::model::Predictor;
use crate::trainer::ProductionModel;

pub const YEAR_HEADER: &str = "year";
pub const WEEK_HEADER: &str = "semana";
pub const STORE_HEADER: &str = "pdv";
pub const PRODUCT_HEADER: &str = "produto";
pub const QUANTITY_HEADER: &str = "quantidade";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityFormat {
    /// Rounded half-to-even and rendered as an integer.
    Rounded,
    /// Rendered as the raw floating point prediction.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_path: PathBuf,
    pub target_weeks: Vec<u32>,
    pub delimiter: char,
    pub quantity_format: QuantityFormat,
    pub include_year: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("forecast.csv"),
            target_weeks: vec![1, 2, 3, 4, 5],
            delimiter: ';',
            quantity_format: QuantityFormat::Rounded,
            include_year: true,
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<(), ExportError> {
        if !self.delimiter.is_ascii() || self.delimiter.is_ascii_alphanumeric() {
            return Err(ExportError::InvalidConfig(format!(
                "delimiter must be an ASCII punctuation or whitespace character, got {:?}",
                self.delimiter
            )));
        }
        if self.target_weeks.is_empty() {
            return Err(ExportError::InvalidConfig(
                "target_weeks must not be empty".to_string(),
            ));
        }
        if self.target_weeks.iter().any(|w| *w == 0 || *w > 53) {
            return Err(ExportError::InvalidConfig(
                "target_weeks entries must be ISO weeks in 1..=53".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub year: Option<i32>,
    pub week: u32,
    pub store_id: String,
    pub product_id: String,
    pub predicted_quantity: f64,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid export config: {0}")]
    InvalidConfig(String),
    #[error("feature schema error: {0}")]
    Schema(#[from] FeatureError),
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Predictions for every dataset row whose week is a target week, ordered by
/// (year, week, store, product). Quantities are left unrounded here.
pub fn build_forecast<M: Predictor>(
    model: &ProductionModel<M>,
    dataset: &Dataset,
    cfg: &ExportConfig,
) -> Result<Vec<ForecastRecord>, ExportError> {
    cfg.validate()?;
    let predictions = model.predict_dataset(dataset)?;

    let mut records: Vec<ForecastRecord> = dataset
        .keys()
        .iter()
        .zip(predictions)
        .filter(|(key, _)| cfg.target_weeks.contains(&key.week))
        .map(|(key, predicted_quantity)| ForecastRecord {
            year: key.year,
            week: key.week,
            store_id: key.store_id.clone(),
            product_id: key.product_id.clone(),
            predicted_quantity,
        })
        .collect();
    records.sort_by(|a, b| {
        a.year
            .cmp(&b.year)
            .then_with(|| a.week.cmp(&b.week))
            .then_with(|| a.store_id.cmp(&b.store_id))
            .then_with(|| a.product_id.cmp(&b.product_id))
    });

    info!(
        component = "export",
        event = "export.records.built",
        dataset_rows = dataset.len(),
        records = records.len(),
        target_weeks = ?cfg.target_weeks
    );

    Ok(records)
}

pub fn format_quantity(value: f64, format: QuantityFormat) -> String {
    match format {
        QuantityFormat::Rounded => format!("{}", value.round_ties_even() as i64),
        // Debug keeps the fractional part of whole numbers: 12.0, not 12.
        QuantityFormat::Raw => format!("{value:?}"),
    }
}

pub fn write_forecast<W: Write>(
    records: &[ForecastRecord],
    cfg: &ExportConfig,
    writer: W,
) -> Result<(), ExportError> {
    cfg.validate()?;
    let mut out = csv::WriterBuilder::new()
        .delimiter(cfg.delimiter as u8)
        .from_writer(writer);

    let mut header = Vec::with_capacity(5);
    if cfg.include_year {
        header.push(YEAR_HEADER);
    }
    header.extend([WEEK_HEADER, STORE_HEADER, PRODUCT_HEADER, QUANTITY_HEADER]);
    out.write_record(&header)?;

    for record in records {
        let mut fields = Vec::with_capacity(5);
        if cfg.include_year {
            fields.push(record.year.map(|y| y.to_string()).unwrap_or_default());
        }
        fields.push(record.week.to_string());
        fields.push(record.store_id.clone());
        fields.push(record.product_id.clone());
        fields.push(format_quantity(record.predicted_quantity, cfg.quantity_format));
        out.write_record(&fields)?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn render_forecast(
    records: &[ForecastRecord],
    cfg: &ExportConfig,
) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    write_forecast(records, cfg, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn export_forecast_file(
    records: &[ForecastRecord],
    cfg: &ExportConfig,
    path: &Path,
) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = fs::File::create(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_forecast(records, cfg, file)?;

    info!(
        component = "export",
        event = "export.finish",
        path = %path.display(),
        records = records.len(),
        delimiter = %cfg.delimiter,
        quantity_format = ?cfg.quantity_format
    );
    Ok(())
}
