//! Weighted mean absolute percentage error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MetricError {
    /// sum(actual) == 0: the ratio is undefined.
    #[error("degenerate metric: sum of actuals is zero (absolute error {absolute_error})")]
    Degenerate { absolute_error: f64 },
    #[error("length mismatch: {actual} actuals vs {predicted} predictions")]
    LengthMismatch { actual: usize, predicted: usize },
    #[error("cannot score an empty partition")]
    Empty,
}

/// Per-partition WMAPE result, keeping the degenerate case distinct from any score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WmapeOutcome {
    Score { value: f64 },
    Degenerate { absolute_error: f64 },
}

impl WmapeOutcome {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Score { value } => Some(*value),
            Self::Degenerate { .. } => None,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Degenerate { .. })
    }
}

/// sum(|actual - predicted|) / sum(actual).
pub fn wmape(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    if actual.len() != predicted.len() {
        return Err(MetricError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(MetricError::Empty);
    }

    let absolute_error = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>();
    let total = actual.iter().sum::<f64>();
    if total == 0.0 {
        return Err(MetricError::Degenerate { absolute_error });
    }

    Ok(absolute_error / total)
}

/// Like [`wmape`], folding the degenerate case into a [`WmapeOutcome`].
pub fn wmape_outcome(actual: &[f64], predicted: &[f64]) -> Result<WmapeOutcome, MetricError> {
    match wmape(actual, predicted) {
        Ok(value) => Ok(WmapeOutcome::Score { value }),
        Err(MetricError::Degenerate { absolute_error }) => {
            Ok(WmapeOutcome::Degenerate { absolute_error })
        }
        Err(other) => Err(other),
    }
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
    if actual.len() != predicted.len() {
        return Err(MetricError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(MetricError::Empty);
    }
    let sum = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>();
    Ok(sum / actual.len() as f64)
}
