//! Regression capability used by the trainer: anything that can be fitted on a
//! feature matrix and then predict numeric targets.

use thiserror::Error;

use crate::metrics::MetricError;

#[derive(Debug, Clone, Copy)]
pub struct TrainingSet<'a> {
    pub features: &'a [Vec<f64>],
    pub targets: &'a [f64],
}

impl<'a> TrainingSet<'a> {
    pub fn new(features: &'a [Vec<f64>], targets: &'a [f64]) -> Self {
        Self { features, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("{features} feature rows but {targets} targets")]
    LengthMismatch { features: usize, targets: usize },
    #[error("row {row} has {found} features, expected {expected}")]
    FeatureWidthMismatch {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("target at row {row} is not finite: {value}")]
    InvalidTarget { row: usize, value: f64 },
    #[error("invalid model config: {0}")]
    InvalidConfig(String),
    #[error("eval metric error: {0}")]
    EvalMetric(#[from] MetricError),
}

pub trait Predictor {
    fn feature_count(&self) -> usize;

    fn predict_row(&self, features: &[f64]) -> f64;

    fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

pub trait Regressor {
    type Model: Predictor;

    /// Fits a fresh model. `eval`, when given, drives early stopping.
    fn fit(
        &self,
        train: TrainingSet<'_>,
        eval: Option<TrainingSet<'_>>,
    ) -> Result<Self::Model, ModelError>;
}

/// Checks shape and target sanity shared by every regressor.
pub fn check_training_set(set: &TrainingSet<'_>) -> Result<usize, ModelError> {
    if set.features.len() != set.targets.len() {
        return Err(ModelError::LengthMismatch {
            features: set.features.len(),
            targets: set.targets.len(),
        });
    }
    let Some(first) = set.features.first() else {
        return Err(ModelError::EmptyTrainingSet);
    };
    let width = first.len();
    for (row, values) in set.features.iter().enumerate() {
        if values.len() != width {
            return Err(ModelError::FeatureWidthMismatch {
                row,
                found: values.len(),
                expected: width,
            });
        }
    }
    for (row, value) in set.targets.iter().enumerate() {
        if !value.is_finite() {
            return Err(ModelError::InvalidTarget { row, value: *value });
        }
    }
    Ok(width)
}
