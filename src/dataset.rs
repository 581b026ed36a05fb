//! Assembly of the trainable (features, target) table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::entity::{EntityMatch, ReferenceTables, ResolutionReport};
use crate::features::{
    FeatureSchema, FeatureTable, ProductStats, PRODUCT_MEAN_COLUMN, PRODUCT_STD_COLUMN,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub store_id: String,
    pub product_id: String,
    pub year: Option<i32>,
    pub week: u32,
    pub time_ordinal: i64,
}

/// Immutable trainable table. Rows stay in (product, store, time) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    schema: FeatureSchema,
    keys: Vec<RowKey>,
    features: Vec<Vec<f64>>,
    targets: Vec<f64>,
    references: Vec<EntityMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub input_rows: u64,
    pub rows_kept: u64,
    pub rows_missing_history: u64,
    pub resolution: ResolutionReport,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error(
        "insufficient history: features need {required} prior weeks but the longest series has {longest} weeks"
    )]
    InsufficientHistory { required: usize, longest: usize },
    #[error("feature table is empty")]
    EmptyInput,
}

impl Dataset {
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn keys(&self) -> &[RowKey] {
        &self.keys
    }

    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    /// Left-join result per row; informational only, never a model input.
    pub fn references(&self) -> &[EntityMatch] {
        &self.references
    }

    pub fn time_ordinals(&self) -> Vec<i64> {
        self.keys.iter().map(|k| k.time_ordinal).collect()
    }

    /// Copies the selected rows into an owned (features, targets) pair.
    pub fn subset(&self, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
        let features = indices.iter().map(|i| self.features[*i].clone()).collect();
        let targets = indices.iter().map(|i| self.targets[*i]).collect();
        (features, targets)
    }

    /// Like [`Dataset::subset`], with the product mean/std columns replaced by
    /// `stats`. Products absent from `stats` get missing (`NaN`) statistics.
    pub fn subset_with_product_stats(
        &self,
        indices: &[usize],
        stats: &HashMap<String, ProductStats>,
    ) -> (Vec<Vec<f64>>, Vec<f64>) {
        let (mut features, targets) = self.subset(indices);
        let mean_idx = self.schema.column_index(PRODUCT_MEAN_COLUMN);
        let std_idx = self.schema.column_index(PRODUCT_STD_COLUMN);

        for (row, idx) in features.iter_mut().zip(indices) {
            let product = stats.get(self.keys[*idx].product_id.as_str());
            if let Some(i) = mean_idx {
                row[i] = product.map(|s| s.mean).unwrap_or(f64::NAN);
            }
            if let Some(i) = std_idx {
                row[i] = product.and_then(|s| s.std).unwrap_or(f64::NAN);
            }
        }
        (features, targets)
    }
}

pub fn assemble_dataset(
    table: &FeatureTable,
    references: &ReferenceTables,
) -> Result<(Dataset, AssemblyReport), DatasetError> {
    if table.rows.is_empty() {
        return Err(DatasetError::EmptyInput);
    }

    let required = table.config.required_history();
    let longest = longest_series(table);
    if required >= longest {
        return Err(DatasetError::InsufficientHistory { required, longest });
    }

    let (matches, resolution) = references.resolve_all(
        table
            .rows
            .iter()
            .map(|row| (row.bucket.store_id.as_str(), row.bucket.product_id.as_str())),
    );

    let mut report = AssemblyReport {
        input_rows: table.rows.len() as u64,
        resolution,
        ..AssemblyReport::default()
    };
    let mut keys = Vec::new();
    let mut features = Vec::new();
    let mut targets = Vec::new();
    let mut kept_references = Vec::new();

    for (row, reference) in table.rows.iter().zip(matches) {
        let Some(values) = row.values() else {
            report.rows_missing_history += 1;
            continue;
        };
        keys.push(RowKey {
            store_id: row.bucket.store_id.clone(),
            product_id: row.bucket.product_id.clone(),
            year: row.bucket.year,
            week: row.bucket.week,
            time_ordinal: row.bucket.time_ordinal,
        });
        features.push(values);
        targets.push(row.bucket.quantity);
        kept_references.push(reference);
    }
    report.rows_kept = targets.len() as u64;

    debug!(
        component = "dataset",
        event = "dataset.missing_history_filtered",
        rows_missing_history = report.rows_missing_history
    );
    info!(
        component = "dataset",
        event = "dataset.assemble.finish",
        input_rows = report.input_rows,
        rows_kept = report.rows_kept,
        rows_missing_history = report.rows_missing_history,
        feature_count = table.schema.width()
    );

    Ok((
        Dataset {
            schema: table.schema.clone(),
            keys,
            features,
            targets,
            references: kept_references,
        },
        report,
    ))
}

fn longest_series(table: &FeatureTable) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<(&str, &str)> = None;
    for row in &table.rows {
        let key = (row.bucket.product_id.as_str(), row.bucket.store_id.as_str());
        if previous == Some(key) {
            current += 1;
        } else {
            current = 1;
            previous = Some(key);
        }
        longest = longest.max(current);
    }
    longest
}
