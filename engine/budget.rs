// ========================================================================================
//
//                              MEMORY BUDGET PLANNING
//
// ========================================================================================
//
// Turns a memory ceiling into two decisions: how many output rows are assembled per
// block, and whether the whole input is cached up front or re-read once per block.
// The accounting is a heuristic, not an exact measurement of resident memory. It never
// fails for a valid ceiling; the worst case is one output row per block.

use crate::error::ValidationError;

/// If caching every input row would use less than this fraction of the budget that is
/// left after fixed costs, the whole input is cached before the first block.
pub const DEFAULT_FULL_CACHE_FRACTION: f64 = 0.7;

const BYTES_PER_GIGABYTE: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_VALUE: u64 = std::mem::size_of::<f32>() as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    Unlimited,
    Bytes(u64),
}

impl MemoryLimit {
    /// `None` means unlimited. Negative or non-finite limits are rejected; zero is
    /// valid and means one output row at a time.
    pub fn from_gigabytes(limit_gb: Option<f64>) -> Result<Self, ValidationError> {
        match limit_gb {
            None => Ok(Self::Unlimited),
            Some(gb) if !gb.is_finite() || gb < 0.0 => Err(ValidationError::InvalidMemoryLimit(gb)),
            Some(gb) => Ok(Self::Bytes((gb * BYTES_PER_GIGABYTE) as u64)),
        }
    }
}

/// Static facts about the computation that the plan depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetFacts {
    /// Rows in the input matrix (N). Each output row has this many values.
    pub total_rows: usize,
    /// Columns in the input matrix (M).
    pub columns: usize,
    /// Worker threads, each owning one transient row buffer.
    pub workers: usize,
    /// Whether the input already lives in memory and so counts against the budget.
    pub source_resident: bool,
    /// Bookkeeping bytes held per input row for the lifetime of the engine.
    pub row_info_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    /// Output rows assembled per block, in `[1, output_rows]`.
    pub rows_per_block: usize,
    /// True when every input row is cached once before the block loop.
    pub cache_full_input: bool,
}

impl BlockPlan {
    pub fn block_count(&self, output_rows: usize) -> usize {
        output_rows.div_ceil(self.rows_per_block.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudgetPlanner {
    full_cache_fraction: f64,
}

impl Default for MemoryBudgetPlanner {
    fn default() -> Self {
        Self {
            full_cache_fraction: DEFAULT_FULL_CACHE_FRACTION,
        }
    }
}

impl MemoryBudgetPlanner {
    pub fn new(full_cache_fraction: f64) -> Result<Self, ValidationError> {
        if !(full_cache_fraction > 0.0 && full_cache_fraction <= 1.0) {
            return Err(ValidationError::InvalidCacheFraction(full_cache_fraction));
        }
        Ok(Self {
            full_cache_fraction,
        })
    }

    /// Plans the block size for `output_rows` output rows (N, or the number of rows
    /// selected by an ROI).
    pub fn plan(&self, limit: MemoryLimit, facts: &BudgetFacts, output_rows: usize) -> BlockPlan {
        let max_rows = output_rows.max(1);
        let target_bytes = match limit {
            MemoryLimit::Unlimited => {
                return BlockPlan {
                    rows_per_block: max_rows,
                    cache_full_input: true,
                };
            }
            MemoryLimit::Bytes(bytes) => bytes,
        };

        // Signed and wide: the fixed costs can exceed a small ceiling.
        let total_rows = facts.total_rows as i128;
        let in_row_bytes = facts.columns as i128 * BYTES_PER_VALUE as i128;
        let out_row_bytes = total_rows * BYTES_PER_VALUE as i128;
        let input_bytes = total_rows * in_row_bytes;

        let mut remaining = target_bytes as i128;
        if facts.source_resident {
            remaining -= input_bytes;
        }
        remaining -= in_row_bytes * facts.workers.max(1) as i128;
        remaining -= total_rows * facts.row_info_bytes as i128;

        let mut per_row_bytes = in_row_bytes + out_row_bytes;
        let cache_full_input = (input_bytes as f64) < remaining as f64 * self.full_cache_fraction;
        if cache_full_input {
            remaining -= input_bytes;
            per_row_bytes = out_row_bytes;
        }

        let rows = if per_row_bytes <= 0 {
            1
        } else {
            (remaining / per_row_bytes).max(1)
        };
        BlockPlan {
            rows_per_block: usize::try_from(rows).unwrap_or(usize::MAX).min(max_rows),
            cache_full_input,
        }
    }
}
