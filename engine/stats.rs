// ========================================================================================
//
//                              ROW STATISTICS AND CENTERING
//
// ========================================================================================
//
// Every row is reduced to a (weighted) mean and the root of its residual sum of squares,
// then centered in place. After centering, the numerator of the correlation between two
// rows is a plain dot product over the retained columns: weights are folded in as
// sqrt(weight) per column, so the product of two centered values carries exactly one
// factor of the weight.
//
// Both statistics use two passes in f64: the mean first, then squared deviations.

use crate::weights::WeightModel;

/// Memoized statistics for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowStats {
    pub mean: f64,
    pub root_resid_sqr: f64,
}

impl RowStats {
    /// Computes the statistics of a raw (uncentered) row of `weights.column_count()`
    /// values.
    pub fn compute(row: &[f32], weights: &WeightModel) -> Self {
        debug_assert_eq!(row.len(), weights.column_count());
        let mean = row_mean(row, weights);
        let root_resid_sqr = residual_sum_of_squares(row, mean, weights).sqrt();
        Self {
            mean,
            root_resid_sqr,
        }
    }

    /// A row with no spread has no defined correlation with anything else.
    pub fn is_degenerate(&self) -> bool {
        self.root_resid_sqr.is_nan() || self.root_resid_sqr <= 0.0
    }
}

fn row_mean(row: &[f32], weights: &WeightModel) -> f64 {
    match (weights.retained_indices(), weights.retained_weights()) {
        (Some(indices), Some(retained)) => {
            if weights.is_binary() {
                let sum: f64 = indices.iter().map(|&i| f64::from(row[i])).sum();
                sum / indices.len() as f64
            } else {
                let mut weighted_sum = 0.0f64;
                let mut weight_total = 0.0f64;
                for (&i, &w) in indices.iter().zip(retained) {
                    weighted_sum += f64::from(row[i]) * f64::from(w);
                    weight_total += f64::from(w);
                }
                weighted_sum / weight_total
            }
        }
        _ => {
            let sum: f64 = row.iter().map(|&v| f64::from(v)).sum();
            sum / row.len() as f64
        }
    }
}

fn residual_sum_of_squares(row: &[f32], mean: f64, weights: &WeightModel) -> f64 {
    match (weights.retained_indices(), weights.retained_weights()) {
        (Some(indices), Some(retained)) => {
            if weights.is_binary() {
                indices
                    .iter()
                    .map(|&i| {
                        let dev = f64::from(row[i]) - mean;
                        dev * dev
                    })
                    .sum()
            } else {
                indices
                    .iter()
                    .zip(retained)
                    .map(|(&i, &w)| {
                        let dev = f64::from(row[i]) - mean;
                        dev * dev * f64::from(w)
                    })
                    .sum()
            }
        }
        _ => row
            .iter()
            .map(|&v| {
                let dev = f64::from(v) - mean;
                dev * dev
            })
            .sum(),
    }
}

/// Centers a raw row in place. In weighted mode the retained columns are compacted to
/// the front of the buffer and scaled by the square root of their weight; only the
/// first `weights.retained_count()` values are meaningful afterwards.
pub fn center_in_place(row: &mut [f32], mean: f64, weights: &WeightModel) {
    match (weights.retained_indices(), weights.retained_weights()) {
        (Some(indices), Some(retained)) => {
            // `indices` is strictly increasing, so `indices[k] >= k` and the forward
            // pass never overwrites a value it still has to read.
            if weights.is_binary() {
                for (k, &i) in indices.iter().enumerate() {
                    row[k] = (f64::from(row[i]) - mean) as f32;
                }
            } else {
                for (k, (&i, &w)) in indices.iter().zip(retained).enumerate() {
                    row[k] = (f64::from(w).sqrt() * (f64::from(row[i]) - mean)) as f32;
                }
            }
        }
        _ => {
            for value in row.iter_mut() {
                *value = (f64::from(*value) - mean) as f32;
            }
        }
    }
}
