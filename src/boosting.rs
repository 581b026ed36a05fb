//! Gradient-boosted regression trees on top of the `gbdt` crate.
//!
//! Trees are fitted in stages of `trees_per_stage` iterations. Each stage is a
//! squared-error `GBDT` trained on the residuals of the stages before it, over
//! a row and column sample drawn from a seeded `StdRng`. With an evaluation
//! set, its mean absolute error is checked after every stage and training stops
//! once `early_stopping_rounds` iterations pass without improvement.

use std::fmt;

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec, ValueType, VALUE_TYPE_UNKNOWN};
use gbdt::gradient_boost::GBDT;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::metrics::mean_absolute_error;
use crate::model::{check_training_set, ModelError, Predictor, Regressor, TrainingSet};

const LOSS: &str = "SquaredError";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: u32,
    pub min_data_in_leaf: usize,
    pub feature_fraction: f64,
    pub bagging_fraction: f64,
    pub trees_per_stage: usize,
    pub seed: u64,
    pub early_stopping_rounds: Option<usize>,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 2_000,
            learning_rate: 0.03,
            max_depth: 6,
            min_data_in_leaf: 20,
            feature_fraction: 0.8,
            bagging_fraction: 0.8,
            trees_per_stage: 10,
            seed: 42,
            early_stopping_rounds: Some(100),
        }
    }
}

impl BoostingConfig {
    /// Settings of the single-holdout variant: no subsampling, no early stopping.
    pub fn basic() -> Self {
        Self {
            n_estimators: 1_000,
            learning_rate: 0.05,
            max_depth: 5,
            feature_fraction: 1.0,
            bagging_fraction: 1.0,
            seed: 0,
            early_stopping_rounds: None,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: &str| Err(ModelError::InvalidConfig(msg.to_string()));
        if self.n_estimators == 0 {
            return invalid("n_estimators must be > 0");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid("learning_rate must be a positive finite number");
        }
        if self.max_depth == 0 {
            return invalid("max_depth must be > 0");
        }
        if self.min_data_in_leaf == 0 {
            return invalid("min_data_in_leaf must be > 0");
        }
        for (name, value) in [
            ("feature_fraction", self.feature_fraction),
            ("bagging_fraction", self.bagging_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ModelError::InvalidConfig(format!(
                    "{name} must be in (0, 1]"
                )));
            }
        }
        if self.trees_per_stage == 0 {
            return invalid("trees_per_stage must be > 0");
        }
        if self.early_stopping_rounds == Some(0) {
            return invalid("early_stopping_rounds must be > 0 when set");
        }
        Ok(())
    }

    fn stage_config(&self, feature_size: usize, iterations: usize) -> Config {
        let mut cfg = Config::new();
        cfg.set_feature_size(feature_size);
        cfg.set_max_depth(self.max_depth);
        cfg.set_min_leaf_size(self.min_data_in_leaf);
        cfg.set_iterations(iterations);
        cfg.set_shrinkage(self.learning_rate as ValueType);
        cfg.set_loss(LOSS);
        // Rows and columns are already sampled per stage from the seeded rng.
        cfg.set_data_sample_ratio(1.0);
        cfg.set_feature_sample_ratio(1.0);
        cfg.set_debug(false);
        cfg.set_training_optimization_level(2);
        cfg
    }
}

#[derive(Debug, Clone)]
pub struct GradientBoostingRegressor {
    config: BoostingConfig,
}

impl GradientBoostingRegressor {
    pub fn new(config: BoostingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BoostingConfig {
        &self.config
    }
}

/// One `GBDT` fitted on residuals over a subset of the feature columns.
struct Stage {
    columns: Vec<usize>,
    trees: usize,
    booster: GBDT,
}

impl Stage {
    fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let data: DataVec = rows
            .iter()
            .map(|row| Data::new_test_data(project(row, &self.columns), None))
            .collect();
        self.booster
            .predict(&data)
            .into_iter()
            .map(f64::from)
            .collect()
    }
}

pub struct GradientBoostingModel {
    base_score: f64,
    stages: Vec<Stage>,
    feature_count: usize,
    best_iteration: Option<usize>,
    eval_l1_history: Vec<f64>,
}

impl GradientBoostingModel {
    pub fn tree_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.trees).sum()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    /// Zero-based iteration with the lowest evaluation L1, when an eval set was used.
    pub fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    /// Evaluation L1 after each stage.
    pub fn eval_l1_history(&self) -> &[f64] {
        &self.eval_l1_history
    }
}

impl fmt::Debug for GradientBoostingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientBoostingModel")
            .field("base_score", &self.base_score)
            .field("stages", &self.stages.len())
            .field("trees", &self.tree_count())
            .field("feature_count", &self.feature_count)
            .field("best_iteration", &self.best_iteration)
            .finish()
    }
}

impl Predictor for GradientBoostingModel {
    fn feature_count(&self) -> usize {
        self.feature_count
    }

    fn predict_row(&self, features: &[f64]) -> f64 {
        self.predict(&[features.to_vec()])
            .first()
            .copied()
            .unwrap_or(self.base_score)
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let mut out = vec![self.base_score; rows.len()];
        for stage in &self.stages {
            for (value, delta) in out.iter_mut().zip(stage.predict(rows)) {
                *value += delta;
            }
        }
        out
    }
}

impl Regressor for GradientBoostingRegressor {
    type Model = GradientBoostingModel;

    fn fit(
        &self,
        train: TrainingSet<'_>,
        eval: Option<TrainingSet<'_>>,
    ) -> Result<GradientBoostingModel, ModelError> {
        let cfg = &self.config;
        cfg.validate()?;
        let width = check_training_set(&train)?;
        if let Some(eval) = &eval {
            let eval_width = check_training_set(eval)?;
            if eval_width != width {
                return Err(ModelError::FeatureWidthMismatch {
                    row: 0,
                    found: eval_width,
                    expected: width,
                });
            }
        }

        let n = train.len();
        let base_score = train.targets.iter().sum::<f64>() / n as f64;
        let mut predictions = vec![base_score; n];
        let mut eval_predictions = vec![base_score; eval.map_or(0, |e| e.len())];
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let row_sample = sample_size(n, cfg.bagging_fraction);
        let column_sample = sample_size(width, cfg.feature_fraction);

        let mut stages: Vec<Stage> = Vec::new();
        let mut eval_l1_history = Vec::new();
        // (stage index, last iteration of that stage, eval L1)
        let mut best: Option<(usize, usize, f64)> = None;
        let mut fitted = 0;

        while fitted < cfg.n_estimators {
            let iterations = cfg.trees_per_stage.min(cfg.n_estimators - fitted);
            let rows = sampled_indices(&mut rng, n, row_sample);
            let columns = sampled_indices(&mut rng, width, column_sample);

            let mut data: DataVec = rows
                .iter()
                .map(|&r| {
                    let residual = train.targets[r] - predictions[r];
                    Data::new_training_data(
                        project(&train.features[r], &columns),
                        1.0,
                        residual as ValueType,
                        None,
                    )
                })
                .collect();
            let mut booster = GBDT::new(&cfg.stage_config(columns.len(), iterations));
            booster.fit(&mut data);
            let stage = Stage {
                columns,
                trees: iterations,
                booster,
            };

            for (prediction, delta) in predictions.iter_mut().zip(stage.predict(train.features)) {
                *prediction += delta;
            }
            fitted += iterations;
            let iteration = fitted - 1;

            let mut stop = false;
            if let Some(eval) = &eval {
                for (prediction, delta) in eval_predictions
                    .iter_mut()
                    .zip(stage.predict(eval.features))
                {
                    *prediction += delta;
                }
                let l1 = mean_absolute_error(eval.targets, &eval_predictions)?;
                eval_l1_history.push(l1);
                if best.map_or(true, |(_, _, best_l1)| l1 < best_l1) {
                    best = Some((stages.len(), iteration, l1));
                }
                if let (Some(rounds), Some((_, best_iteration, _))) =
                    (cfg.early_stopping_rounds, best)
                {
                    stop = iteration - best_iteration >= rounds;
                }
            }
            stages.push(stage);

            if stop {
                debug!(
                    component = "boosting",
                    event = "boosting.early_stop",
                    iteration,
                    best_iteration = best.map(|(_, i, _)| i)
                );
                break;
            }
        }

        if cfg.early_stopping_rounds.is_some() {
            if let Some((best_stage, _, _)) = best {
                stages.truncate(best_stage + 1);
            }
        }

        let model = GradientBoostingModel {
            base_score,
            stages,
            feature_count: width,
            best_iteration: best.map(|(_, i, _)| i),
            eval_l1_history,
        };
        info!(
            component = "boosting",
            event = "boosting.fit.finish",
            rows = n,
            features = width,
            stages = model.stage_count(),
            trees = model.tree_count(),
            best_iteration = ?model.best_iteration,
            best_eval_l1 = ?best.map(|(_, _, l1)| l1)
        );
        Ok(model)
    }
}

/// Picks `columns` out of `row`; missing values become the crate's unknown marker.
fn project(row: &[f64], columns: &[usize]) -> Vec<ValueType> {
    columns
        .iter()
        .map(|c| match row.get(*c) {
            Some(v) if !v.is_nan() => *v as ValueType,
            _ => VALUE_TYPE_UNKNOWN,
        })
        .collect()
}

fn sample_size(total: usize, fraction: f64) -> usize {
    ((total as f64 * fraction).round() as usize).clamp(1, total.max(1))
}

fn sampled_indices(rng: &mut StdRng, total: usize, amount: usize) -> Vec<usize> {
    if amount >= total {
        return (0..total).collect();
    }
    let mut picked = sample(rng, total, amount).into_vec();
    picked.sort_unstable();
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> BoostingConfig {
        BoostingConfig {
            n_estimators: 200,
            learning_rate: 0.1,
            max_depth: 3,
            min_data_in_leaf: 2,
            feature_fraction: 1.0,
            bagging_fraction: 1.0,
            early_stopping_rounds: None,
            ..BoostingConfig::default()
        }
    }

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let features: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let targets = (0..40).map(|i| if i < 20 { 5.0 } else { 15.0 }).collect();
        (features, targets)
    }

    #[test]
    fn project_maps_missing_values_to_unknown() {
        let row = vec![1.5, f64::NAN, 3.0];
        assert_eq!(project(&row, &[2, 0]), vec![3.0, 1.5]);
        assert_eq!(project(&row, &[1, 7]), vec![VALUE_TYPE_UNKNOWN; 2]);
    }

    #[test]
    fn fits_a_step_function() {
        let (features, targets) = step_data();
        let model = GradientBoostingRegressor::new(small_config())
            .fit(TrainingSet::new(&features, &targets), None)
            .expect("fit");

        assert_eq!(model.feature_count(), 2);
        assert_eq!(model.stage_count(), 20);
        assert!((model.predict_row(&[3.0, 0.0]) - 5.0).abs() < 0.1);
        assert!((model.predict_row(&[35.0, 2.0]) - 15.0).abs() < 0.1);
    }

    #[test]
    fn missing_feature_values_still_predict() {
        let (mut features, targets) = step_data();
        for (i, row) in features.iter_mut().enumerate() {
            if i % 5 == 0 {
                row[1] = f64::NAN;
            }
        }
        let model = GradientBoostingRegressor::new(small_config())
            .fit(TrainingSet::new(&features, &targets), None)
            .expect("fit");

        let low = model.predict_row(&[3.0, f64::NAN]);
        assert!(low.is_finite());
        assert!((low - 5.0).abs() < 1.0, "prediction {low}");
    }

    #[test]
    fn fit_without_eval_set_keeps_every_tree() {
        let (features, targets) = step_data();
        let cfg = BoostingConfig {
            n_estimators: 25,
            early_stopping_rounds: Some(5),
            ..small_config()
        };
        let model = GradientBoostingRegressor::new(cfg)
            .fit(TrainingSet::new(&features, &targets), None)
            .expect("fit");

        assert_eq!(model.tree_count(), 25);
        assert_eq!(model.stage_count(), 3);
        assert_eq!(model.best_iteration(), None);
        assert!(model.eval_l1_history().is_empty());
    }

    #[test]
    fn same_seed_gives_identical_predictions() {
        let (features, targets) = step_data();
        let cfg = BoostingConfig {
            n_estimators: 60,
            feature_fraction: 0.5,
            bagging_fraction: 0.7,
            seed: 7,
            ..small_config()
        };
        let a = GradientBoostingRegressor::new(cfg.clone())
            .fit(TrainingSet::new(&features, &targets), None)
            .expect("fit a");
        let b = GradientBoostingRegressor::new(cfg)
            .fit(TrainingSet::new(&features, &targets), None)
            .expect("fit b");
        assert_eq!(a.predict(&features), b.predict(&features));
    }

    #[test]
    fn early_stopping_keeps_the_best_stage() {
        let (features, targets) = step_data();
        // Eval targets are the opposite of what training teaches, so the
        // first stage is the best one and every later stage is worse.
        let eval_features = vec![vec![5.0, 1.0], vec![30.0, 0.0]];
        let eval_targets = vec![15.0, 5.0];
        let cfg = BoostingConfig {
            n_estimators: 500,
            trees_per_stage: 10,
            early_stopping_rounds: Some(10),
            ..small_config()
        };
        let model = GradientBoostingRegressor::new(cfg)
            .fit(
                TrainingSet::new(&features, &targets),
                Some(TrainingSet::new(&eval_features, &eval_targets)),
            )
            .expect("fit");

        assert_eq!(model.best_iteration(), Some(9));
        assert_eq!(model.tree_count(), 10);
        assert_eq!(model.eval_l1_history().len(), 2);
        let history = model.eval_l1_history();
        assert!(history[0] < history[1]);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let reg = GradientBoostingRegressor::new(small_config());
        let empty: Vec<Vec<f64>> = Vec::new();
        assert_eq!(
            reg.fit(TrainingSet::new(&empty, &[]), None).unwrap_err(),
            ModelError::EmptyTrainingSet
        );

        let ragged = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(
            reg.fit(TrainingSet::new(&ragged, &[1.0, 2.0]), None),
            Err(ModelError::FeatureWidthMismatch { row: 1, .. })
        ));

        let rows = vec![vec![1.0]];
        for bad in [
            BoostingConfig {
                feature_fraction: 0.0,
                ..small_config()
            },
            BoostingConfig {
                trees_per_stage: 0,
                ..small_config()
            },
        ] {
            assert!(matches!(
                GradientBoostingRegressor::new(bad).fit(TrainingSet::new(&rows, &[1.0]), None),
                Err(ModelError::InvalidConfig(_))
            ));
        }
    }
}
