//! Fold-wise fitting and scoring, and the full-data production refit.
//!
//! Each fold owns an independently fitted model inside [`CrossValidation`];
//! the [`ProductionModel`] is always a separate fit on the whole dataset.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::features::{assert_schema_compatible, product_statistics, FeatureError, FeatureSchema};
use crate::metrics::{wmape_outcome, MetricError, WmapeOutcome};
use crate::model::{ModelError, Predictor, Regressor, TrainingSet};
use crate::validation::Fold;

/// Where per-product mean/std features come from during fold evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsScope {
    /// Computed once over the whole bucket history (mild temporal leak).
    #[default]
    Global,
    /// Recomputed from each fold's training rows only.
    FoldScoped,
}

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("metric error: {0}")]
    Metric(#[from] MetricError),
    #[error("feature schema error: {0}")]
    Schema(#[from] FeatureError),
    #[error("no folds to evaluate")]
    NoFolds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub index: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub train_max_ordinal: i64,
    pub validation_min_ordinal: i64,
    pub validation_max_ordinal: i64,
    pub wmape: WmapeOutcome,
}

#[derive(Debug, Clone)]
pub struct FoldResult<M> {
    pub report: FoldReport,
    pub model: M,
}

#[derive(Debug, Clone)]
pub struct CrossValidation<M> {
    pub folds: Vec<FoldResult<M>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub folds: Vec<FoldReport>,
    /// Mean over non-degenerate folds; `None` when every fold is degenerate.
    pub mean_wmape: Option<f64>,
    pub degenerate_folds: usize,
}

impl<M> CrossValidation<M> {
    pub fn summary(&self) -> EvaluationSummary {
        let folds: Vec<FoldReport> = self.folds.iter().map(|f| f.report.clone()).collect();
        let scores: Vec<f64> = folds.iter().filter_map(|f| f.wmape.score()).collect();
        let mean_wmape =
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);
        EvaluationSummary {
            degenerate_folds: folds.len() - scores.len(),
            folds,
            mean_wmape,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProductionModel<M> {
    model: M,
    schema_version: u32,
    schema_fingerprint: String,
    trained_rows: usize,
}

impl<M: Predictor> ProductionModel<M> {
    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn schema_fingerprint(&self) -> &str {
        &self.schema_fingerprint
    }

    pub fn trained_rows(&self) -> usize {
        self.trained_rows
    }

    pub fn check_schema(&self, schema: &FeatureSchema) -> Result<(), FeatureError> {
        assert_schema_compatible(self.schema_version, &self.schema_fingerprint, schema)
    }

    /// Predicts every row of `dataset`, refusing datasets built with another schema.
    pub fn predict_dataset(&self, dataset: &Dataset) -> Result<Vec<f64>, FeatureError> {
        self.check_schema(dataset.schema())?;
        Ok(self.model.predict(dataset.features()))
    }
}

pub fn cross_validate<R: Regressor>(
    regressor: &R,
    dataset: &Dataset,
    folds: &[Fold],
    stats_scope: StatsScope,
) -> Result<CrossValidation<R::Model>, TrainerError> {
    if folds.is_empty() {
        return Err(TrainerError::NoFolds);
    }

    let mut results = Vec::with_capacity(folds.len());
    for fold in folds {
        info!(
            component = "trainer",
            event = "trainer.fold.start",
            fold = fold.index + 1,
            train_rows = fold.train.len(),
            validation_rows = fold.validation.len(),
            stats_scope = ?stats_scope
        );

        let ((train_x, train_y), (val_x, val_y)) = match stats_scope {
            StatsScope::Global => (dataset.subset(&fold.train), dataset.subset(&fold.validation)),
            StatsScope::FoldScoped => {
                let stats = product_statistics(fold.train.iter().map(|i| {
                    (
                        dataset.keys()[*i].product_id.as_str(),
                        dataset.targets()[*i],
                    )
                }));
                (
                    dataset.subset_with_product_stats(&fold.train, &stats),
                    dataset.subset_with_product_stats(&fold.validation, &stats),
                )
            }
        };

        let model = regressor.fit(
            TrainingSet::new(&train_x, &train_y),
            Some(TrainingSet::new(&val_x, &val_y)),
        )?;
        let predictions = model.predict(&val_x);
        let wmape = wmape_outcome(&val_y, &predictions)?;

        match wmape {
            WmapeOutcome::Score { value } => info!(
                component = "trainer",
                event = "trainer.fold.scored",
                fold = fold.index + 1,
                wmape = value
            ),
            WmapeOutcome::Degenerate { absolute_error } => warn!(
                component = "trainer",
                event = "trainer.fold.degenerate",
                fold = fold.index + 1,
                absolute_error,
                reason = "validation actuals sum to zero"
            ),
        }

        results.push(FoldResult {
            report: FoldReport {
                index: fold.index,
                train_rows: fold.train.len(),
                validation_rows: fold.validation.len(),
                train_max_ordinal: fold.train_max_ordinal,
                validation_min_ordinal: fold.validation_min_ordinal,
                validation_max_ordinal: fold.validation_max_ordinal,
                wmape,
            },
            model,
        });
    }

    let cv = CrossValidation { folds: results };
    let summary = cv.summary();
    info!(
        component = "trainer",
        event = "trainer.cv.finish",
        folds = summary.folds.len(),
        mean_wmape = ?summary.mean_wmape,
        degenerate_folds = summary.degenerate_folds
    );
    Ok(cv)
}

/// Refits on every row of `dataset` without an evaluation set.
pub fn fit_production<R: Regressor>(
    regressor: &R,
    dataset: &Dataset,
) -> Result<ProductionModel<R::Model>, TrainerError> {
    let model = regressor.fit(
        TrainingSet::new(dataset.features(), dataset.targets()),
        None,
    )?;

    info!(
        component = "trainer",
        event = "trainer.production.fit",
        rows = dataset.len(),
        schema_fingerprint = %dataset.schema().fingerprint
    );

    Ok(ProductionModel {
        model,
        schema_version: dataset.schema().version,
        schema_fingerprint: dataset.schema().fingerprint.clone(),
        trained_rows: dataset.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::aggregate::{aggregate_weekly, CalendarKey};
    use crate::dataset::assemble_dataset;
    use crate::entity::ReferenceTables;
    use crate::features::{synthesize_features, FeatureConfig, PRODUCT_MEAN_COLUMN};
    use crate::input::Transaction;
    use crate::validation::{build_folds, ValidationStrategy};
    use chrono::NaiveDate;

    /// Constant model that remembers every training matrix it was fitted on.
    #[derive(Default)]
    struct RecordingRegressor {
        seen: RefCell<Vec<Vec<Vec<f64>>>>,
    }

    struct Constant(f64);

    impl Predictor for Constant {
        fn feature_count(&self) -> usize {
            0
        }

        fn predict_row(&self, _features: &[f64]) -> f64 {
            self.0
        }
    }

    impl Regressor for RecordingRegressor {
        type Model = Constant;

        fn fit(
            &self,
            train: TrainingSet<'_>,
            _eval: Option<TrainingSet<'_>>,
        ) -> Result<Constant, ModelError> {
            self.seen.borrow_mut().push(train.features.to_vec());
            Ok(Constant(train.targets.iter().sum::<f64>() / train.len() as f64))
        }
    }

    fn dataset(quantities: &[f64]) -> Dataset {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let transactions: Vec<Transaction> = quantities
            .iter()
            .enumerate()
            .map(|(i, q)| Transaction {
                date: start + chrono::Duration::weeks(i as i64),
                store_id: "s1".to_string(),
                product_id: "p1".to_string(),
                quantity: *q,
            })
            .collect();
        let (buckets, _) = aggregate_weekly(&transactions, CalendarKey::IsoYearWeek);
        let cfg = FeatureConfig {
            lags: vec![1],
            rolling_windows: vec![],
            cyclical_week: false,
            ..FeatureConfig::default()
        };
        let (table, _) = synthesize_features(&buckets, &cfg).unwrap();
        let refs = ReferenceTables::new(vec!["p1".to_string()], vec!["s1".to_string()]);
        assemble_dataset(&table, &refs).unwrap().0
    }

    fn report(index: usize, wmape: WmapeOutcome) -> FoldResult<()> {
        FoldResult {
            report: FoldReport {
                index,
                train_rows: 1,
                validation_rows: 1,
                train_max_ordinal: 0,
                validation_min_ordinal: 1,
                validation_max_ordinal: 1,
                wmape,
            },
            model: (),
        }
    }

    #[test]
    fn summary_averages_only_scored_folds() {
        let cv = CrossValidation {
            folds: vec![
                report(0, WmapeOutcome::Score { value: 0.2 }),
                report(1, WmapeOutcome::Degenerate { absolute_error: 4.0 }),
                report(2, WmapeOutcome::Score { value: 0.4 }),
            ],
        };
        let summary = cv.summary();
        assert_eq!(summary.degenerate_folds, 1);
        assert!((summary.mean_wmape.unwrap() - 0.3).abs() < 1e-12);

        let all_degenerate = CrossValidation {
            folds: vec![report(0, WmapeOutcome::Degenerate { absolute_error: 0.0 })],
        };
        assert_eq!(all_degenerate.summary().mean_wmape, None);
    }

    #[test]
    fn fold_scoped_stats_come_from_training_rows_only() {
        let data = dataset(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let folds = build_folds(&data.time_ordinals(), ValidationStrategy::Holdout { horizon: 1 })
            .unwrap();
        assert_eq!(folds[0].train.len(), 3);
        let mean_idx = data.schema().column_index(PRODUCT_MEAN_COLUMN).unwrap();

        let global = RecordingRegressor::default();
        cross_validate(&global, &data, &folds, StatsScope::Global).unwrap();
        assert_eq!(global.seen.borrow()[0][0][mean_idx], 3.5);

        let scoped = RecordingRegressor::default();
        let cv = cross_validate(&scoped, &data, &folds, StatsScope::FoldScoped).unwrap();
        assert_eq!(scoped.seen.borrow()[0][0][mean_idx], 3.0);
        assert_eq!(cv.folds.len(), 1);
        assert!(cv.folds[0].report.wmape.score().is_some());
    }

    #[test]
    fn production_refit_uses_every_row_and_checks_schema() {
        let data = dataset(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let regressor = RecordingRegressor::default();
        let production = fit_production(&regressor, &data).unwrap();

        assert_eq!(production.trained_rows(), data.len());
        assert_eq!(regressor.seen.borrow()[0].len(), data.len());
        assert_eq!(production.predict_dataset(&data).unwrap(), vec![4.0; 5]);

        let other = dataset(&[1.0, 2.0, 3.0]);
        assert!(production.check_schema(other.schema()).is_ok());
    }

    #[test]
    fn empty_fold_list_is_an_error() {
        let data = dataset(&[1.0, 2.0, 3.0]);
        let err = cross_validate(&RecordingRegressor::default(), &data, &[], StatsScope::Global)
            .err()
            .unwrap();
        assert!(matches!(err, TrainerError::NoFolds));
    }
}
