//! Weekly demand forecasting crate.
//!
//! Current implemented scope:
//! - CSV loading of transactions and product/store reference tables
//! - ISO-week aggregation per (store, product) pair
//! - lag/rolling/frequency/cyclical features with a fingerprinted schema
//! - chronological holdout and expanding-window validation scored by WMAPE
//! - gradient-boosted trees via the `gbdt` crate and delimited forecast export

mod aggregate;
mod boosting;
mod config;
mod dataset;
mod entity;
mod export;
mod features;
mod input;
mod metrics;
mod model;
mod observability;
mod pipeline;
mod trainer;
mod validation;

pub use aggregate::{
    absolute_week_ordinal, aggregate_weekly, iso_calendar, AggregationReport, CalendarKey,
    IsoCalendar, WeeklyBucket,
};
pub use boosting::{BoostingConfig, GradientBoostingModel, GradientBoostingRegressor};
pub use config::{
    apply_env_overrides, load_pipeline_config, pipeline_config_from_env, ConfigError, InputPaths,
    PipelineConfig, Variant, CONFIG_PATH_ENV, OUTPUT_PATH_ENV, PRODUCTS_PATH_ENV, SEED_ENV,
    STORES_PATH_ENV, TRANSACTIONS_PATH_ENV, VARIANT_ENV,
};
pub use dataset::{assemble_dataset, AssemblyReport, Dataset, DatasetError, RowKey};
pub use entity::{EntityMatch, ReferenceTables, ResolutionReport};
pub use export::{
    build_forecast, export_forecast_file, format_quantity, render_forecast, write_forecast,
    ExportConfig, ExportError, ForecastRecord, QuantityFormat,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, cyclical_week_encoding, frequency_counts,
    product_statistics, synthesize_features, validate_feature_config, FeatureColumn, FeatureConfig,
    FeatureDType, FeatureError, FeatureReport, FeatureRow, FeatureSchema, FeatureTable,
    ProductStats, FEATURE_SCHEMA_VERSION,
};
pub use input::{
    load_reference_ids, load_transactions, read_reference_ids, read_transactions, LoadError,
    LoadReport, Transaction, PRODUCT_ID_COLUMN, STORE_ID_COLUMN,
};
pub use metrics::{mean_absolute_error, wmape, wmape_outcome, MetricError, WmapeOutcome};
pub use model::{check_training_set, ModelError, Predictor, Regressor, TrainingSet};
pub use observability::{
    init_logging, log_app_start, log_config_selected, log_run_finish, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{run_pipeline, run_with_tables, ForecastRun, PipelineError, PipelineReport};
pub use trainer::{
    cross_validate, fit_production, CrossValidation, EvaluationSummary, FoldReport, FoldResult,
    ProductionModel, StatsScope, TrainerError,
};
pub use validation::{
    build_folds, expanding_window_folds, holdout_split, Fold, ValidationError,
    ValidationStrategy, DEFAULT_FOLDS, DEFAULT_HOLDOUT_HORIZON,
};
