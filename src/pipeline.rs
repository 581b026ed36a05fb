//! End-to-end run: load, aggregate, featurize, assemble, validate, refit and
//! export.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::aggregate::{aggregate_weekly, AggregationReport};
use crate::config::{ConfigError, PipelineConfig};
use crate::dataset::{assemble_dataset, AssemblyReport, DatasetError};
use crate::entity::ReferenceTables;
use crate::export::{build_forecast, export_forecast_file, ExportError, ForecastRecord};
use crate::features::{synthesize_features, FeatureError, FeatureReport};
use crate::boosting::GradientBoostingRegressor;
use crate::input::{
    load_reference_ids, load_transactions, LoadError, LoadReport, Transaction, PRODUCT_ID_COLUMN,
    STORE_ID_COLUMN,
};
use crate::model::Regressor;
use crate::trainer::{
    cross_validate, fit_production, CrossValidation, EvaluationSummary, ProductionModel,
    TrainerError,
};
use crate::validation::{build_folds, ValidationError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Trainer(#[from] TrainerError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub load: LoadReport,
    pub aggregation: AggregationReport,
    pub features: FeatureReport,
    pub assembly: AssemblyReport,
    pub evaluation: EvaluationSummary,
    pub schema_fingerprint: String,
    pub forecast_records: usize,
    pub output_path: PathBuf,
}

/// Everything a run produces before the forecast file is written.
#[derive(Debug, Clone)]
pub struct ForecastRun<M> {
    pub report: PipelineReport,
    pub records: Vec<ForecastRecord>,
    pub cross_validation: CrossValidation<M>,
    pub production: ProductionModel<M>,
}

/// Reads the three input tables named in `cfg.inputs`, runs the boosted model
/// and writes the forecast to `cfg.export.output_path`.
pub fn run_pipeline(cfg: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    cfg.validate()?;

    let (transactions, load) = load_transactions(&cfg.inputs.transactions)?;
    let products = load_reference_ids(&cfg.inputs.products, PRODUCT_ID_COLUMN)?;
    let stores = load_reference_ids(&cfg.inputs.stores, STORE_ID_COLUMN)?;
    let references = ReferenceTables::new(products, stores);

    let regressor = GradientBoostingRegressor::new(cfg.boosting.clone());
    let run = run_with_tables(&regressor, &transactions, load, &references, cfg)?;

    export_forecast_file(&run.records, &cfg.export, &cfg.export.output_path)?;
    Ok(run.report)
}

/// In-memory part of a run; nothing is written to disk.
pub fn run_with_tables<R: Regressor>(
    regressor: &R,
    transactions: &[Transaction],
    load: LoadReport,
    references: &ReferenceTables,
    cfg: &PipelineConfig,
) -> Result<ForecastRun<R::Model>, PipelineError> {
    info!(
        component = "pipeline",
        event = "pipeline.start",
        transactions = transactions.len(),
        calendar_key = ?cfg.calendar_key,
        validation = ?cfg.validation,
        stats_scope = ?cfg.stats_scope
    );

    let result = forecast_stages(regressor, transactions, load, references, cfg);
    match &result {
        Ok(run) => info!(
            component = "pipeline",
            event = "pipeline.finish",
            dataset_rows = run.report.assembly.rows_kept,
            mean_wmape = ?run.report.evaluation.mean_wmape,
            degenerate_folds = run.report.evaluation.degenerate_folds,
            forecast_records = run.records.len()
        ),
        Err(err) => error!(
            component = "pipeline",
            event = "pipeline.error",
            error = %err
        ),
    }
    result
}

fn forecast_stages<R: Regressor>(
    regressor: &R,
    transactions: &[Transaction],
    load: LoadReport,
    references: &ReferenceTables,
    cfg: &PipelineConfig,
) -> Result<ForecastRun<R::Model>, PipelineError> {
    cfg.validate()?;
    let (buckets, aggregation) = aggregate_weekly(transactions, cfg.calendar_key);
    let (table, features) = synthesize_features(&buckets, &cfg.features)?;
    let (dataset, assembly) = assemble_dataset(&table, references)?;

    // Fold construction fails fast, before any model is fitted.
    let folds = build_folds(&dataset.time_ordinals(), cfg.validation)?;
    let cross_validation = cross_validate(regressor, &dataset, &folds, cfg.stats_scope)?;
    let production = fit_production(regressor, &dataset)?;
    let records = build_forecast(&production, &dataset, &cfg.export)?;

    let report = PipelineReport {
        load,
        aggregation,
        features,
        assembly,
        evaluation: cross_validation.summary(),
        schema_fingerprint: production.schema_fingerprint().to_string(),
        forecast_records: records.len(),
        output_path: cfg.export.output_path.clone(),
    };

    Ok(ForecastRun {
        report,
        records,
        cross_validation,
        production,
    })
}
