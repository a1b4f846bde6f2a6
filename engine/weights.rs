//! # Column Weights
//!
//! An optional per-column weight vector for the correlation. Zero-weight columns are
//! dropped up front so that every later pass only touches the retained columns, and
//! a vector of all ones collapses back to the plain unweighted computation.

use crate::error::ValidationError;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
enum WeightMode {
    Unweighted,
    Weighted {
        /// Original column index of each retained column, ascending.
        indices: Vec<usize>,
        /// The weight of each retained column, aligned with `indices`.
        weights: Vec<f32>,
        /// True iff every retained weight is exactly 1.0.
        binary: bool,
    },
}

/// The validated weighting for one matrix. Construction is the only place weights are
/// checked, so a `WeightModel` in hand is always consistent with the column count.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightModel {
    mode: WeightMode,
    n_cols: usize,
}

impl WeightModel {
    pub fn unweighted(n_cols: usize) -> Self {
        Self {
            mode: WeightMode::Unweighted,
            n_cols,
        }
    }

    /// Builds the model from an optional weight list. `None` is unweighted mode.
    pub fn new(weights: Option<&[f32]>, n_cols: usize) -> Result<Self, ValidationError> {
        let Some(weights) = weights else {
            return Ok(Self::unweighted(n_cols));
        };
        if weights.len() != n_cols {
            return Err(ValidationError::WeightCountMismatch {
                expected: n_cols,
                found: weights.len(),
            });
        }

        let mut indices = Vec::new();
        let mut retained = Vec::new();
        let mut binary = true;
        for (column, &value) in weights.iter().enumerate() {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteWeight { column, value });
            }
            if value < 0.0 {
                return Err(ValidationError::NegativeWeight { column, value });
            }
            if value == 0.0 {
                continue;
            }
            if value != 1.0 {
                binary = false;
            }
            indices.push(column);
            retained.push(value);
        }

        if indices.is_empty() {
            return Err(ValidationError::NoRetainedColumns);
        }
        // All ones and nothing dropped is the same computation as no weights at all.
        if binary && indices.len() == n_cols {
            return Ok(Self::unweighted(n_cols));
        }

        Ok(Self {
            mode: WeightMode::Weighted {
                indices,
                weights: retained,
                binary,
            },
            n_cols,
        })
    }

    pub fn is_weighted(&self) -> bool {
        matches!(self.mode, WeightMode::Weighted { .. })
    }

    /// True when weighted and every retained weight is 1.0, which allows the cheaper
    /// sum/count statistics path.
    pub fn is_binary(&self) -> bool {
        matches!(self.mode, WeightMode::Weighted { binary: true, .. })
    }

    /// Number of columns that take part in the correlation. This is also the length of
    /// every centered row.
    pub fn retained_count(&self) -> usize {
        match &self.mode {
            WeightMode::Unweighted => self.n_cols,
            WeightMode::Weighted { indices, .. } => indices.len(),
        }
    }

    /// Retained column indices, or `None` in unweighted mode (every column is retained).
    pub fn retained_indices(&self) -> Option<&[usize]> {
        match &self.mode {
            WeightMode::Unweighted => None,
            WeightMode::Weighted { indices, .. } => Some(indices),
        }
    }

    /// Weights of the retained columns, or `None` in unweighted mode.
    pub fn retained_weights(&self) -> Option<&[f32]> {
        match &self.mode {
            WeightMode::Unweighted => None,
            WeightMode::Weighted { weights, .. } => Some(weights),
        }
    }

    pub fn column_count(&self) -> usize {
        self.n_cols
    }
}

/// Reads whitespace-separated floats until end of input or the first token that does
/// not parse. Parsing stops silently at a bad token; callers validate the count.
pub fn parse_float_list(text: &str) -> Vec<f32> {
    text.split_whitespace()
        .map_while(|token| token.parse::<f32>().ok())
        .collect()
}

/// Loads a weight list file: plain text, one weight per column.
pub fn load_weight_file(path: &Path) -> Result<Vec<f32>, ValidationError> {
    if !path.exists() {
        return Err(ValidationError::WeightFileMissing(path.to_path_buf()));
    }
    let unreadable = |source| ValidationError::WeightFileUnreadable {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(unreadable)?;
    let mut text = String::new();
    BufReader::new(file)
        .read_to_string(&mut text)
        .map_err(unreadable)?;
    Ok(parse_float_list(&text))
}
