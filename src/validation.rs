//! Chronological train/validation partitions.
//!
//! Partitions are made purely on the time ordinal of each row; rows are never
//! shuffled or sampled.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_HOLDOUT_HORIZON: u32 = 2;
pub const DEFAULT_FOLDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ValidationStrategy {
    /// train = ordinal < M - horizon, validation = ordinal >= M - horizon.
    Holdout { horizon: u32 },
    /// k+1 contiguous time segments; fold i trains on segments 1..=i.
    ExpandingWindow { folds: usize },
}

impl Default for ValidationStrategy {
    fn default() -> Self {
        Self::ExpandingWindow {
            folds: DEFAULT_FOLDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub train_max_ordinal: i64,
    pub validation_min_ordinal: i64,
    pub validation_max_ordinal: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("insufficient fold data: {0}")]
    InsufficientFoldData(String),
    #[error("invalid validation config: {0}")]
    InvalidConfig(String),
}

pub fn build_folds(
    time_ordinals: &[i64],
    strategy: ValidationStrategy,
) -> Result<Vec<Fold>, ValidationError> {
    let folds = match strategy {
        ValidationStrategy::Holdout { horizon } => vec![holdout_split(time_ordinals, horizon)?],
        ValidationStrategy::ExpandingWindow { folds } => {
            expanding_window_folds(time_ordinals, folds)?
        }
    };

    info!(
        component = "validation",
        event = "validation.folds.built",
        strategy = ?strategy,
        folds = folds.len(),
        rows = time_ordinals.len()
    );

    Ok(folds)
}

pub fn holdout_split(time_ordinals: &[i64], horizon: u32) -> Result<Fold, ValidationError> {
    let max = time_ordinals
        .iter()
        .copied()
        .max()
        .ok_or_else(|| ValidationError::InsufficientFoldData("dataset is empty".to_string()))?;
    let boundary = max - horizon as i64;

    let (train, validation): (Vec<usize>, Vec<usize>) =
        (0..time_ordinals.len()).partition(|i| time_ordinals[*i] < boundary);

    if train.is_empty() {
        return Err(ValidationError::InsufficientFoldData(format!(
            "holdout horizon {horizon} leaves no training rows before ordinal {boundary}"
        )));
    }

    make_fold(0, time_ordinals, train, validation)
}

/// Expanding-window folds over the distinct time ordinals, sized the way a
/// `TimeSeriesSplit` sizes them: each validation segment holds
/// `n / (folds + 1)` distinct ordinals and the first training segment absorbs
/// the remainder.
pub fn expanding_window_folds(
    time_ordinals: &[i64],
    folds: usize,
) -> Result<Vec<Fold>, ValidationError> {
    if folds == 0 {
        return Err(ValidationError::InvalidConfig(
            "folds must be > 0".to_string(),
        ));
    }

    let mut distinct: Vec<i64> = time_ordinals.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    let n = distinct.len();
    if n < folds + 1 {
        return Err(ValidationError::InsufficientFoldData(format!(
            "{folds} folds need at least {} distinct weeks, found {n}",
            folds + 1
        )));
    }

    let segment = n / (folds + 1);
    let first_train = n - folds * segment;

    let segment_of = |ordinal: i64| -> usize {
        // distinct is sorted and contains every ordinal.
        let pos = distinct.partition_point(|d| *d < ordinal);
        if pos < first_train {
            0
        } else {
            1 + (pos - first_train) / segment
        }
    };
    let row_segments: Vec<usize> = time_ordinals.iter().map(|o| segment_of(*o)).collect();

    let mut out = Vec::with_capacity(folds);
    for fold in 0..folds {
        let train: Vec<usize> = (0..time_ordinals.len())
            .filter(|i| row_segments[*i] <= fold)
            .collect();
        let validation: Vec<usize> = (0..time_ordinals.len())
            .filter(|i| row_segments[*i] == fold + 1)
            .collect();
        out.push(make_fold(fold, time_ordinals, train, validation)?);
    }
    Ok(out)
}

fn make_fold(
    index: usize,
    time_ordinals: &[i64],
    train: Vec<usize>,
    validation: Vec<usize>,
) -> Result<Fold, ValidationError> {
    let train_max_ordinal = train.iter().map(|i| time_ordinals[*i]).max();
    let validation_min_ordinal = validation.iter().map(|i| time_ordinals[*i]).min();
    let validation_max_ordinal = validation.iter().map(|i| time_ordinals[*i]).max();

    match (train_max_ordinal, validation_min_ordinal, validation_max_ordinal) {
        (Some(train_max_ordinal), Some(validation_min_ordinal), Some(validation_max_ordinal)) => {
            Ok(Fold {
                index,
                train,
                validation,
                train_max_ordinal,
                validation_min_ordinal,
                validation_max_ordinal,
            })
        }
        _ => Err(ValidationError::InsufficientFoldData(format!(
            "fold {} has {} training and {} validation rows",
            index + 1,
            train.len(),
            validation.len()
        ))),
    }
}
