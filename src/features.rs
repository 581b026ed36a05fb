//! Weekly buckets to model features: per-product statistics, group-wise lags
//! and trailing rolling means, frequency encodings and cyclical week encoding.

use std::collections::{HashMap, HashSet, VecDeque};
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::aggregate::WeeklyBucket;

const WEEKS_PER_CYCLE: f64 = 52.0;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const WEEK_COLUMN: &str = "week";
pub const MONTH_COLUMN: &str = "month";
pub const DAY_OF_WEEK_COLUMN: &str = "day_of_week";
pub const PRODUCT_MEAN_COLUMN: &str = "product_mean";
pub const PRODUCT_STD_COLUMN: &str = "product_std";
pub const PRODUCT_FREQ_COLUMN: &str = "product_freq";
pub const STORE_FREQ_COLUMN: &str = "store_freq";
pub const WEEK_SIN_COLUMN: &str = "week_sin";
pub const WEEK_COS_COLUMN: &str = "week_cos";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub lags: Vec<u32>,
    pub rolling_windows: Vec<u32>,
    pub cyclical_week: bool,
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 2, 3, 4, 12],
            rolling_windows: vec![3, 4, 12],
            cyclical_week: true,
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

impl FeatureConfig {
    /// Longest history a row needs before all of its lag/rolling features are defined.
    pub fn required_history(&self) -> usize {
        self.lags
            .iter()
            .chain(self.rolling_windows.iter())
            .copied()
            .max()
            .unwrap_or(0) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductStats {
    pub mean: f64,
    /// Sample standard deviation (ddof = 1); undefined for a single observation.
    pub std: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub bucket: WeeklyBucket,
    pub product_mean: f64,
    pub product_std: Option<f64>,
    /// Aligned with `FeatureConfig::lags`.
    pub lags: Vec<Option<f64>>,
    /// Aligned with `FeatureConfig::rolling_windows`.
    pub rolling_means: Vec<Option<f64>>,
    pub product_freq: u64,
    pub store_freq: u64,
    pub week_cycle: Option<(f64, f64)>,
}

impl FeatureRow {
    pub fn has_complete_history(&self) -> bool {
        self.lags.iter().all(Option::is_some) && self.rolling_means.iter().all(Option::is_some)
    }

    /// Feature values in schema order, or `None` when a lag or rolling mean is
    /// undefined. An undefined product std is emitted as `NaN` (missing).
    pub fn values(&self) -> Option<Vec<f64>> {
        let mut values = Vec::with_capacity(9 + self.lags.len() + self.rolling_means.len());
        values.push(self.bucket.week as f64);
        values.push(self.bucket.month as f64);
        values.push(self.bucket.day_of_week as f64);
        values.push(self.product_mean);
        values.push(self.product_std.unwrap_or(f64::NAN));
        for lag in &self.lags {
            values.push((*lag)?);
        }
        for mean in &self.rolling_means {
            values.push((*mean)?);
        }
        values.push(self.product_freq as f64);
        values.push(self.store_freq as f64);
        if let Some((sin, cos)) = self.week_cycle {
            values.push(sin);
            values.push(cos);
        }
        Some(values)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub config: FeatureConfig,
    /// Sorted by (product_id, store_id, time_ordinal).
    pub rows: Vec<FeatureRow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureReport {
    pub rows: u64,
    pub groups: u64,
    pub products: u64,
    pub stores: u64,
    pub rows_with_complete_history: u64,
    pub longest_group_history: u64,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid feature config: {0}")]
    InvalidConfig(String),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// Trailing quantities of one (product, store) group, oldest first.
#[derive(Debug, Clone)]
struct GroupHistory {
    quantities: VecDeque<f64>,
    depth: usize,
}

impl GroupHistory {
    fn new(depth: usize) -> Self {
        Self {
            quantities: VecDeque::with_capacity(depth + 1),
            depth,
        }
    }

    fn reset(&mut self) {
        self.quantities.clear();
    }

    fn push(&mut self, quantity: f64) {
        self.quantities.push_back(quantity);
        while self.quantities.len() > self.depth {
            self.quantities.pop_front();
        }
    }

    fn lag(&self, k: usize) -> Option<f64> {
        if k == 0 || self.quantities.len() < k {
            return None;
        }
        Some(self.quantities[self.quantities.len() - k])
    }

    fn rolling_mean(&self, w: usize) -> Option<f64> {
        if w == 0 || self.quantities.len() < w {
            return None;
        }
        let start = self.quantities.len() - w;
        let sum = self.quantities.range(start..).copied().sum::<f64>();
        Some(sum / w as f64)
    }
}

pub fn validate_feature_config(cfg: &FeatureConfig) -> Result<(), FeatureError> {
    if cfg.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(FeatureError::InvalidConfig(format!(
            "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
        )));
    }
    if cfg.lags.is_empty() && cfg.rolling_windows.is_empty() {
        return Err(FeatureError::InvalidConfig(
            "at least one lag or rolling window is required".to_string(),
        ));
    }

    for (label, values) in [("lags", &cfg.lags), ("rolling_windows", &cfg.rolling_windows)] {
        let mut seen = HashSet::new();
        for value in values {
            if *value == 0 {
                return Err(FeatureError::InvalidConfig(format!(
                    "{label} entries must be > 0"
                )));
            }
            if !seen.insert(*value) {
                return Err(FeatureError::InvalidConfig(format!(
                    "{label} entries must be unique"
                )));
            }
        }
    }

    Ok(())
}

pub fn build_feature_schema(cfg: &FeatureConfig) -> FeatureSchema {
    let mut names: Vec<String> = [
        WEEK_COLUMN,
        MONTH_COLUMN,
        DAY_OF_WEEK_COLUMN,
        PRODUCT_MEAN_COLUMN,
        PRODUCT_STD_COLUMN,
    ]
    .iter()
    .map(|name| name.to_string())
    .collect();
    names.extend(cfg.lags.iter().map(|k| format!("lag_{k}")));
    names.extend(cfg.rolling_windows.iter().map(|w| format!("rolling_mean_{w}")));
    names.push(PRODUCT_FREQ_COLUMN.to_string());
    names.push(STORE_FREQ_COLUMN.to_string());
    if cfg.cyclical_week {
        names.push(WEEK_SIN_COLUMN.to_string());
        names.push(WEEK_COS_COLUMN.to_string());
    }

    let columns: Vec<FeatureColumn> = names
        .into_iter()
        .map(|name| FeatureColumn {
            name,
            dtype: FeatureDType::F64,
        })
        .collect();
    let fingerprint = schema_fingerprint(cfg, &columns);

    info!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        lags = ?cfg.lags,
        rolling_windows = ?cfg.rolling_windows,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

pub fn synthesize_features(
    buckets: &[WeeklyBucket],
    cfg: &FeatureConfig,
) -> Result<(FeatureTable, FeatureReport), FeatureError> {
    validate_feature_config(cfg)?;

    info!(
        component = "features",
        event = "features.build.start",
        buckets = buckets.len(),
        lags = ?cfg.lags,
        rolling_windows = ?cfg.rolling_windows,
        cyclical_week = cfg.cyclical_week
    );

    let schema = build_feature_schema(cfg);

    let mut sorted: Vec<&WeeklyBucket> = buckets.iter().collect();
    sorted.sort_by(|a, b| {
        a.product_id
            .cmp(&b.product_id)
            .then_with(|| a.store_id.cmp(&b.store_id))
            .then_with(|| a.time_ordinal.cmp(&b.time_ordinal))
            .then_with(|| a.year.cmp(&b.year))
            .then_with(|| a.week.cmp(&b.week))
    });

    let stats = product_statistics(
        sorted
            .iter()
            .copied()
            .map(|b| (b.product_id.as_str(), b.quantity)),
    );
    let product_freq = frequency_counts(sorted.iter().copied().map(|b| b.product_id.as_str()));
    let store_freq = frequency_counts(sorted.iter().copied().map(|b| b.store_id.as_str()));

    let lags: Vec<usize> = cfg.lags.iter().map(|k| *k as usize).collect();
    let windows: Vec<usize> = cfg.rolling_windows.iter().map(|w| *w as usize).collect();
    let mut history = GroupHistory::new(cfg.required_history().max(1));

    let mut report = FeatureReport {
        rows: sorted.len() as u64,
        products: product_freq.len() as u64,
        stores: store_freq.len() as u64,
        ..FeatureReport::default()
    };
    let mut group_len = 0_u64;
    let mut current_group: Option<(&str, &str)> = None;
    let mut rows = Vec::with_capacity(sorted.len());

    for bucket in sorted {
        let key = (bucket.product_id.as_str(), bucket.store_id.as_str());
        if current_group != Some(key) {
            history.reset();
            current_group = Some(key);
            report.groups += 1;
            group_len = 0;
        }
        group_len += 1;
        report.longest_group_history = report.longest_group_history.max(group_len);

        let product = stats.get(bucket.product_id.as_str());
        let row = FeatureRow {
            bucket: bucket.clone(),
            product_mean: product.map(|s| s.mean).unwrap_or(f64::NAN),
            product_std: product.and_then(|s| s.std),
            lags: lags.iter().map(|k| history.lag(*k)).collect(),
            rolling_means: windows.iter().map(|w| history.rolling_mean(*w)).collect(),
            product_freq: product_freq
                .get(bucket.product_id.as_str())
                .copied()
                .unwrap_or_default(),
            store_freq: store_freq
                .get(bucket.store_id.as_str())
                .copied()
                .unwrap_or_default(),
            week_cycle: cfg
                .cyclical_week
                .then(|| cyclical_week_encoding(bucket.week)),
        };
        if row.has_complete_history() {
            report.rows_with_complete_history += 1;
        }
        history.push(bucket.quantity);
        rows.push(row);
    }

    info!(
        component = "features",
        event = "features.build.finish",
        rows = report.rows,
        groups = report.groups,
        rows_with_complete_history = report.rows_with_complete_history,
        longest_group_history = report.longest_group_history
    );

    Ok((
        FeatureTable {
            schema,
            config: cfg.clone(),
            rows,
        },
        report,
    ))
}

/// Per-product mean and sample standard deviation of bucket quantities.
pub fn product_statistics<'a, I>(observations: I) -> HashMap<String, ProductStats>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut grouped: HashMap<&'a str, Vec<f64>> = HashMap::new();
    for (product_id, quantity) in observations {
        grouped.entry(product_id).or_default().push(quantity);
    }

    grouped
        .into_iter()
        .map(|(product_id, values)| {
            let n = values.len();
            let mean = values.iter().sum::<f64>() / n as f64;
            let std = (n > 1).then(|| {
                let ss = values
                    .iter()
                    .map(|v| {
                        let d = *v - mean;
                        d * d
                    })
                    .sum::<f64>();
                (ss / (n - 1) as f64).sqrt()
            });
            (
                product_id.to_string(),
                ProductStats {
                    mean,
                    std,
                    count: n as u64,
                },
            )
        })
        .collect()
}

pub fn frequency_counts<'a, I>(ids: I) -> HashMap<String, u64>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<String, u64> = HashMap::new();
    for id in ids {
        *counts.entry(id.to_string()).or_default() += 1;
    }
    counts
}

/// Maps week 52 and week 1 onto adjacent points of the unit circle.
pub fn cyclical_week_encoding(week: u32) -> (f64, f64) {
    let angle = 2.0 * PI * (week as f64 / WEEKS_PER_CYCLE);
    (angle.sin(), angle.cos())
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(cfg: &FeatureConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update("lags:");
    for lag in &cfg.lags {
        hasher.update(format!("{lag},"));
    }
    hasher.update(";windows:");
    for window in &cfg.rolling_windows {
        hasher.update(format!("{window},"));
    }
    hasher.update(format!(";cyclical_week:{};", cfg.cyclical_week));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":f64;");
    }
    hex::encode(hasher.finalize())
}
