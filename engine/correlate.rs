// ========================================================================================
//
//                       THE BLOCKED, OUT-OF-CORE CORRELATION ENGINE
//
// ========================================================================================
//
// ### Purpose ###
//
// Computes the Pearson correlation of selected rows of a matrix against every row,
// under a memory budget. Output rows are produced in blocks. For each block:
//
//   1. Fill:      the block's own rows are read, centered and cached (unless the whole
//                 input was cached up front).
//   2. Compute:   every input row is fetched once, strictly in row order, under a single
//                 lock around the source. After the lock is released the fetched row is
//                 correlated, in parallel with other workers, against every row of the
//                 block.
//   3. Write:     finished rows go to the sink; the cache is cleared for the next block.
//
// When the fetched row is itself part of the block, only the upper triangle is computed
// and the value is written to both symmetric cells, so the diagonal block costs half and
// the output is exactly symmetric by construction.

use crate::budget::{BlockPlan, BudgetFacts, MemoryBudgetPlanner, MemoryLimit};
use crate::cache::{RowCache, RowInfo, ScratchRows};
use crate::config::CorrelationOptions;
use crate::error::{CorrelationError, ValidationError};
use crate::layout::RowLayout;
use crate::progress::{CorrelationProgressObserver, CorrelationStage};
use crate::roi::{RoiIndexMap, RoiSelectors};
use crate::source::{MatrixSink, MatrixSource};
use crate::types::CenteredRow;
use crate::weights::WeightModel;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Largest magnitude a correlation may reach before the Fisher transform, keeping the
/// transform finite.
pub const FISHER_Z_CLAMP: f64 = 0.999_999;

/// Correlation of two centered rows.
///
/// Two views of the very same buffer correlate to exactly 1.0. Otherwise the dot product
/// is accumulated in f64 and normalized by both root residuals, then clamped to [-1, 1].
/// A zero-variance row has no defined correlation and yields 0.0. With `fisher_z`, the
/// value is clamped to +/-`FISHER_Z_CLAMP` and mapped through `0.5 * ln((1+r)/(1-r))`.
pub fn correlate(a: &CenteredRow<'_>, b: &CenteredRow<'_>, fisher_z: bool) -> f32 {
    let mut r = if std::ptr::eq(a.values, b.values) {
        1.0
    } else {
        let denominator = a.root_resid_sqr * b.root_resid_sqr;
        if denominator > 0.0 {
            let accum: f64 = a
                .values
                .iter()
                .zip(b.values)
                .map(|(&x, &y)| f64::from(x) * f64::from(y))
                .sum();
            accum / denominator
        } else {
            0.0
        }
    };
    r = r.clamp(-1.0, 1.0);
    if fisher_z {
        r = r.clamp(-FISHER_Z_CLAMP, FISHER_Z_CLAMP);
        (0.5 * ((1.0 + r) / (1.0 - r)).ln()) as f32
    } else {
        r as f32
    }
}

/// The source plus the cursor that forces rows to be fetched in order, behind one lock.
struct SourceGate<S> {
    source: S,
    next_row: usize,
}

/// A (block rows) x N slice of the output under assembly.
///
/// Cells are stored as f32 bit patterns in atomics so that workers can fill disjoint
/// cells through a shared reference. Each cell has exactly one writer per block.
struct OutputBlock {
    cells: Vec<AtomicU32>,
    width: usize,
}

impl OutputBlock {
    fn new(width: usize) -> Self {
        Self {
            cells: Vec::new(),
            width,
        }
    }

    /// Resizes for `rows` rows and zeroes every cell, reusing the allocation.
    fn reset(&mut self, rows: usize) {
        let len = rows * self.width;
        self.cells.truncate(len);
        for cell in &mut self.cells {
            *cell.get_mut() = 0;
        }
        self.cells.resize_with(len, || AtomicU32::new(0));
    }

    #[inline]
    fn store(&self, row: usize, col: usize, value: f32) {
        self.cells[row * self.width + col].store(value.to_bits(), Ordering::Relaxed);
    }

    fn copy_row(&mut self, row: usize, out: &mut [f32]) {
        let start = row * self.width;
        for (dest, cell) in out.iter_mut().zip(&mut self.cells[start..start + self.width]) {
            *dest = f32::from_bits(*cell.get_mut());
        }
    }
}

/// A row being correlated against a block: either borrowed from the cache or streamed
/// into the worker's own scratch buffer.
enum MovingRow<'a> {
    Cached(CenteredRow<'a>),
    Streamed {
        buffer: MutexGuard<'a, Vec<f32>>,
        retained: usize,
        root_resid_sqr: f64,
    },
}

impl MovingRow<'_> {
    fn view(&self) -> CenteredRow<'_> {
        match self {
            Self::Cached(row) => *row,
            Self::Streamed {
                buffer,
                retained,
                root_resid_sqr,
            } => CenteredRow {
                values: &buffer[..*retained],
                root_resid_sqr: *root_resid_sqr,
            },
        }
    }
}

/// Correlates selected rows of a matrix against all of its rows.
pub struct CorrelationEngine<S: MatrixSource> {
    gate: Mutex<SourceGate<S>>,
    n_rows: usize,
    weights: WeightModel,
    cache: RowCache,
    scratch: ScratchRows,
    targets: RoiIndexMap,
    plan: BlockPlan,
    fisher_z: bool,
    pool: rayon::ThreadPool,
}

impl<S> CorrelationEngine<S>
where
    S: MatrixSource + Send,
{
    /// Correlates every row against every row. All validation happens here; no row is
    /// read until [`run`](Self::run).
    pub fn new(source: S, options: &CorrelationOptions) -> Result<Self, CorrelationError> {
        let targets = RoiIndexMap::all_rows(source.n_rows(), source.layout());
        Self::build(source, options, targets)
    }

    /// Correlates the rows selected by `selectors` against every row. Output row `k` is
    /// the `k`-th selected row in structural traversal order.
    pub fn with_roi(
        source: S,
        options: &CorrelationOptions,
        selectors: &RoiSelectors,
    ) -> Result<Self, CorrelationError> {
        check_dimensions(&source)?;
        let layout = source.layout().ok_or(ValidationError::MissingLayout)?;
        let targets = RoiIndexMap::build(layout, selectors, source.n_rows())?;
        Self::build(source, options, targets)
    }

    fn build(
        source: S,
        options: &CorrelationOptions,
        targets: RoiIndexMap,
    ) -> Result<Self, CorrelationError> {
        let (n_rows, n_cols) = check_dimensions(&source)?;
        let weights = WeightModel::new(options.weights.as_deref(), n_cols)?;
        let limit = MemoryLimit::from_gigabytes(options.memory_limit_gb)?;
        let planner = MemoryBudgetPlanner::new(options.full_cache_fraction)?;
        let workers = options.worker_count()?;

        let facts = BudgetFacts {
            total_rows: n_rows,
            columns: n_cols,
            workers,
            source_resident: source.is_memory_resident(),
            row_info_bytes: std::mem::size_of::<RowInfo>(),
        };
        let plan = planner.plan(limit, &facts, targets.len());
        let output_rows = targets.len();
        if plan.cache_full_input {
            if plan.rows_per_block != output_rows {
                info!("computing {} rows at a time", plan.rows_per_block);
            }
        } else {
            info!(
                "computing {} rows at a time, reading rows as needed during processing",
                plan.rows_per_block
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("rowcorr-worker-{i}"))
            .build()?;

        Ok(Self {
            gate: Mutex::new(SourceGate {
                source,
                next_row: 0,
            }),
            n_rows,
            cache: RowCache::new(n_rows, n_cols),
            scratch: ScratchRows::new(workers, n_cols),
            weights,
            targets,
            plan,
            fisher_z: options.fisher_z,
            pool,
        })
    }

    pub fn plan(&self) -> BlockPlan {
        self.plan
    }

    /// (output rows, output columns). Columns always span every input row.
    pub fn output_shape(&self) -> (usize, usize) {
        (self.targets.len(), self.n_rows)
    }

    /// Structural description of the output rows, if the input had one.
    pub fn output_layout(&self) -> Option<&RowLayout> {
        self.targets.output_layout()
    }

    pub fn worker_count(&self) -> usize {
        self.scratch.workers()
    }

    /// Computes the whole output and writes it to `sink`, one block at a time. Any
    /// error aborts the run; the block in flight is not written.
    pub fn run<W, P>(&mut self, sink: &mut W, progress: &mut P) -> Result<(), CorrelationError>
    where
        W: MatrixSink,
        P: CorrelationProgressObserver,
    {
        let output_rows = self.targets.len();
        let block_rows = self.plan.rows_per_block.max(1);
        let retained = self.weights.retained_count();
        self.cache.clear();

        if self.plan.cache_full_input {
            progress.on_stage_start(CorrelationStage::InputCaching, self.n_rows);
            let gate = lock_gate(&mut self.gate)?;
            for row in 0..self.n_rows {
                self.cache.cache_row(row, &mut gate.source, &self.weights)?;
            }
            progress.on_stage_advance(CorrelationStage::InputCaching, self.n_rows);
            progress.on_stage_finish(CorrelationStage::InputCaching);
        }

        // Block position of each original row currently in the block, if any.
        let mut block_position: Vec<Option<usize>> = vec![None; self.n_rows];
        let mut output = OutputBlock::new(self.n_rows);
        let mut row_buffer = vec![0.0f32; self.n_rows];

        progress.on_stage_start(CorrelationStage::BlockCompute, output_rows);
        for start in (0..output_rows).step_by(block_rows) {
            let end = (start + block_rows).min(output_rows);
            let block = start..end;
            debug!("starting block of output rows {}..{}", start, end);

            {
                let gate = lock_gate(&mut self.gate)?;
                for position in block.clone() {
                    let original = self.targets.entries()[position].original.0;
                    if !self.plan.cache_full_input {
                        self.cache.cache_row(original, &mut gate.source, &self.weights)?;
                    }
                    block_position[original] = Some(position);
                }
                gate.next_row = 0;
            }
            output.reset(end - start);

            self.compute_block(block.clone(), &block_position, &output, retained)?;

            for position in block.clone() {
                let entry = self.targets.entries()[position];
                output.copy_row(position - start, &mut row_buffer);
                sink.write_row(entry.compact.0, &row_buffer)
                    .map_err(CorrelationError::sink_error)?;
                block_position[entry.original.0] = None;
            }
            if !self.plan.cache_full_input {
                self.cache.clear();
            }
            progress.on_stage_advance(CorrelationStage::BlockCompute, end);
        }
        progress.on_stage_finish(CorrelationStage::BlockCompute);

        self.cache.clear();
        let degenerate = self.cache.degenerate_rows();
        if degenerate > 0 {
            warn!(
                "{degenerate} rows have zero variance; their correlations with other rows were written as 0"
            );
        }
        Ok(())
    }

    /// The parallel phase for one block. Every input row is visited exactly once.
    fn compute_block(
        &self,
        block: Range<usize>,
        block_position: &[Option<usize>],
        output: &OutputBlock,
        retained: usize,
    ) -> Result<(), CorrelationError> {
        let start = block.start;
        let end = block.end;
        let entries = self.targets.entries();

        self.pool.install(|| {
            (0..self.n_rows).into_par_iter().try_for_each(|_| {
                let worker = rayon::current_thread_index().unwrap_or(0);
                let (row, moving) = self.fetch_next_row(worker, retained)?;
                let moving = moving.view();

                match block_position[row] {
                    Some(position) => {
                        // Upper triangle only; mirror into the symmetric cell.
                        for (j, entry) in entries.iter().enumerate().take(end).skip(position) {
                            let target = self.cache.require_cached(entry.original.0, retained)?;
                            let r = correlate(&moving, &target, self.fisher_z);
                            output.store(j - start, row, r);
                            output.store(position - start, entry.original.0, r);
                        }
                    }
                    None => {
                        for (j, entry) in entries.iter().enumerate().take(end).skip(start) {
                            let target = self.cache.require_cached(entry.original.0, retained)?;
                            output.store(j - start, row, correlate(&moving, &target, self.fisher_z));
                        }
                    }
                }
                Ok(())
            })
        })
    }

    /// Takes the next row in order from the source. Cached rows are borrowed; anything
    /// else is read and centered into this worker's scratch buffer while the source
    /// lock is held. The lock is released before returning.
    fn fetch_next_row(
        &self,
        worker: usize,
        retained: usize,
    ) -> Result<(usize, MovingRow<'_>), CorrelationError> {
        let mut gate = self
            .gate
            .lock()
            .map_err(|_| CorrelationError::Internal("matrix source lock poisoned".into()))?;
        let row = gate.next_row;
        gate.next_row += 1;

        if let Some(cached) = self.cache.cached(row, retained) {
            return Ok((row, MovingRow::Cached(cached)));
        }
        let mut buffer = self.scratch.acquire(worker);
        let root_resid_sqr =
            self.cache
                .load_transient(row, &mut gate.source, &self.weights, &mut buffer)?;
        Ok((
            row,
            MovingRow::Streamed {
                buffer,
                retained,
                root_resid_sqr,
            },
        ))
    }
}

fn check_dimensions<S: MatrixSource>(source: &S) -> Result<(usize, usize), ValidationError> {
    let (rows, cols) = (source.n_rows(), source.n_cols());
    if rows == 0 || cols == 0 {
        return Err(ValidationError::EmptyMatrix { rows, cols });
    }
    Ok((rows, cols))
}

fn lock_gate<S>(gate: &mut Mutex<SourceGate<S>>) -> Result<&mut SourceGate<S>, CorrelationError> {
    gate.get_mut()
        .map_err(|_| CorrelationError::Internal("matrix source lock poisoned".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn row(values: &[f32], root_resid_sqr: f64) -> CenteredRow<'_> {
        CenteredRow {
            values,
            root_resid_sqr,
        }
    }

    #[test]
    fn same_buffer_is_exactly_one() {
        let values = [0.1f32, -0.3, 0.2];
        // A deliberately wrong normalizer proves the short circuit is taken.
        let a = row(&values, 123.0);
        assert_eq!(correlate(&a, &a, false), 1.0);
    }

    #[test]
    fn identical_values_in_different_buffers_are_computed() {
        let first = [-1.0f32, 0.0, 1.0];
        let second = [-1.0f32, 0.0, 1.0];
        let r = correlate(&row(&first, 2.0f64.sqrt()), &row(&second, 2.0f64.sqrt()), false);
        assert_abs_diff_eq!(r, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn overshoot_is_clamped() {
        let a = [1.0f32, -1.0];
        let b = [1.0f32, -1.0];
        // Normalizers too small on purpose: raw value would be 2.
        assert_eq!(correlate(&row(&a, 1.0), &row(&b, 1.0), false), 1.0);
        let c = [-1.0f32, 1.0];
        assert_eq!(correlate(&row(&a, 1.0), &row(&c, 1.0), false), -1.0);
    }

    #[test]
    fn fisher_z_is_finite_at_the_extremes() {
        let a = [1.0f32, -1.0];
        let z = correlate(&row(&a, 1.0), &row(&a, 1.0), true);
        assert!(z.is_finite());
        let expected = 0.5 * ((1.0 + FISHER_Z_CLAMP) / (1.0 - FISHER_Z_CLAMP)).ln();
        assert_abs_diff_eq!(f64::from(z), expected, epsilon = 1e-3);

        let b = [-1.0f32, 1.0];
        let negative = correlate(&row(&a, 2.0f64.sqrt()), &row(&b, 2.0f64.sqrt()), true);
        assert_abs_diff_eq!(negative, -z, epsilon = 1e-3);
    }

    #[test]
    fn zero_variance_rows_correlate_to_zero() {
        let flat = [0.0f32, 0.0, 0.0];
        let other = [-1.0f32, 0.0, 1.0];
        assert_eq!(correlate(&row(&flat, 0.0), &row(&other, 2.0f64.sqrt()), false), 0.0);
        assert_eq!(correlate(&row(&flat, 0.0), &row(&flat, 0.0), false), 1.0);
    }

    #[test]
    fn output_block_reuses_its_allocation() {
        let mut block = OutputBlock::new(3);
        block.reset(2);
        block.store(1, 2, 0.5);
        let mut out = [0.0; 3];
        block.copy_row(1, &mut out);
        assert_eq!(out, [0.0, 0.0, 0.5]);

        block.reset(1);
        assert_eq!(block.cells.len(), 3);
        block.copy_row(0, &mut out);
        assert_eq!(out, [0.0; 3]);
    }
}
