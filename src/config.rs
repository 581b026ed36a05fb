//! Pipeline configuration: named variants, JSON files and `DF_*` overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::CalendarKey;
use crate::export::{ExportConfig, ExportError, QuantityFormat};
use crate::features::{validate_feature_config, FeatureConfig, FeatureError};
use crate::boosting::BoostingConfig;
use crate::model::ModelError;
use crate::trainer::StatsScope;
use crate::validation::ValidationStrategy;

pub const CONFIG_PATH_ENV: &str = "DF_CONFIG_PATH";
pub const TRANSACTIONS_PATH_ENV: &str = "DF_TRANSACTIONS_PATH";
pub const PRODUCTS_PATH_ENV: &str = "DF_PRODUCTS_PATH";
pub const STORES_PATH_ENV: &str = "DF_STORES_PATH";
pub const OUTPUT_PATH_ENV: &str = "DF_OUTPUT_PATH";
pub const VARIANT_ENV: &str = "DF_VARIANT";
pub const SEED_ENV: &str = "DF_SEED";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Week-only buckets, short lags, single holdout, comma-separated raw output.
    Basic,
    #[default]
    Extended,
}

impl Variant {
    pub fn config(self) -> PipelineConfig {
        match self {
            Self::Basic => PipelineConfig::basic(),
            Self::Extended => PipelineConfig::extended(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Extended => "extended",
        }
    }
}

impl FromStr for Variant {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "basic" | "v03" => Ok(Self::Basic),
            "extended" | "v04" => Ok(Self::Extended),
            other => Err(ConfigError::UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    pub transactions: PathBuf,
    pub products: PathBuf,
    pub stores: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            transactions: PathBuf::from("data/transactions.csv"),
            products: PathBuf::from("data/products.csv"),
            stores: PathBuf::from("data/stores.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inputs: InputPaths,
    pub calendar_key: CalendarKey,
    pub features: FeatureConfig,
    pub validation: ValidationStrategy,
    pub stats_scope: StatsScope,
    pub boosting: BoostingConfig,
    pub export: ExportConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::extended()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unknown pipeline variant {0:?}")]
    UnknownVariant(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid feature config: {0}")]
    Feature(#[from] FeatureError),
    #[error("invalid boosting config: {0}")]
    Boosting(#[from] ModelError),
    #[error("invalid export config: {0}")]
    Export(#[from] ExportError),
    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

impl PipelineConfig {
    pub fn extended() -> Self {
        Self {
            inputs: InputPaths::default(),
            calendar_key: CalendarKey::IsoYearWeek,
            features: FeatureConfig::default(),
            validation: ValidationStrategy::default(),
            stats_scope: StatsScope::Global,
            boosting: BoostingConfig::default(),
            export: ExportConfig {
                output_path: PathBuf::from("forecast_jan2023_V04.csv"),
                ..ExportConfig::default()
            },
        }
    }

    pub fn basic() -> Self {
        Self {
            inputs: InputPaths::default(),
            calendar_key: CalendarKey::WeekOnly,
            features: FeatureConfig {
                lags: vec![1, 2, 3],
                rolling_windows: vec![3],
                cyclical_week: false,
                ..FeatureConfig::default()
            },
            validation: ValidationStrategy::Holdout { horizon: 2 },
            stats_scope: StatsScope::Global,
            boosting: BoostingConfig::basic(),
            export: ExportConfig {
                output_path: PathBuf::from("forecast_jan2023_V03.csv"),
                delimiter: ',',
                quantity_format: QuantityFormat::Raw,
                include_year: false,
                ..ExportConfig::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_feature_config(&self.features)?;
        self.boosting.validate()?;
        self.export.validate()?;

        match self.validation {
            ValidationStrategy::Holdout { horizon: 0 } => {
                return Err(ConfigError::Invalid(
                    "holdout horizon must be > 0".to_string(),
                ))
            }
            ValidationStrategy::ExpandingWindow { folds: 0 } => {
                return Err(ConfigError::Invalid(
                    "expanding window needs at least one fold".to_string(),
                ))
            }
            _ => {}
        }

        if self.export.include_year && self.calendar_key == CalendarKey::WeekOnly {
            return Err(ConfigError::Invalid(
                "export.include_year requires calendar_key IsoYearWeek".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_pipeline_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Starting config for a run: the file at `DF_CONFIG_PATH` when set, otherwise
/// the `DF_VARIANT` preset. Path and seed overrides are applied on top.
pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = match non_empty_var(CONFIG_PATH_ENV) {
        Some(path) => load_pipeline_config(Path::new(&path))?,
        None => match non_empty_var(VARIANT_ENV) {
            Some(raw) => raw.parse::<Variant>()?.config(),
            None => PipelineConfig::default(),
        },
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

pub fn apply_env_overrides(config: &mut PipelineConfig) -> Result<(), ConfigError> {
    if let Some(path) = non_empty_var(TRANSACTIONS_PATH_ENV) {
        config.inputs.transactions = PathBuf::from(path);
    }
    if let Some(path) = non_empty_var(PRODUCTS_PATH_ENV) {
        config.inputs.products = PathBuf::from(path);
    }
    if let Some(path) = non_empty_var(STORES_PATH_ENV) {
        config.inputs.stores = PathBuf::from(path);
    }
    if let Some(path) = non_empty_var(OUTPUT_PATH_ENV) {
        config.export.output_path = PathBuf::from(path);
    }
    if let Some(raw) = non_empty_var(SEED_ENV) {
        config.boosting.seed = raw.parse().map_err(|_| ConfigError::InvalidEnv {
            name: SEED_ENV,
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
