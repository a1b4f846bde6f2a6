// ========================================================================================
//
//                                 THE CENTERED ROW CACHE
//
// ========================================================================================
//
// Holds centered rows keyed by their original row index. Storage is a pool of slots that
// grows to the largest number of rows a block ever needs and is then reused: eviction is
// block-granular (`clear` forgets every association at once), never per row.
//
// Mutation of the cache (filling and clearing slots) happens between parallel phases,
// through `&mut self`. During a parallel phase the cache is only read. Row statistics are
// the exception: a row that is streamed rather than cached gets its statistics computed
// lazily during the parallel phase, so they live in a `OnceLock` per row.

use crate::error::CorrelationError;
use crate::source::MatrixSource;
use crate::stats::{RowStats, center_in_place};
use crate::types::CenteredRow;
use crate::weights::WeightModel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Per-row bookkeeping, one entry per input row for the lifetime of the engine.
#[derive(Debug, Default)]
pub struct RowInfo {
    /// Computed at most once per row, the first time the row is read.
    stats: OnceLock<RowStats>,
    /// Slot holding this row's centered values, if it is currently cached.
    slot: Option<usize>,
}

impl RowInfo {
    pub fn stats(&self) -> Option<&RowStats> {
        self.stats.get()
    }

    pub fn is_cached(&self) -> bool {
        self.slot.is_some()
    }
}

/// One reusable row buffer. Its contents are valid only while `owner`'s `RowInfo`
/// points back at this slot.
#[derive(Debug)]
struct CacheSlot {
    values: Vec<f32>,
    owner: usize,
}

#[derive(Debug)]
pub struct RowCache {
    rows: Vec<RowInfo>,
    slots: Vec<CacheSlot>,
    used: usize,
    n_cols: usize,
    degenerate_rows: AtomicUsize,
}

impl RowCache {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            rows: (0..n_rows).map(|_| RowInfo::default()).collect(),
            slots: Vec::new(),
            used: 0,
            n_cols,
            degenerate_rows: AtomicUsize::new(0),
        }
    }

    pub fn row_info(&self, index: usize) -> &RowInfo {
        &self.rows[index]
    }

    /// Number of slots currently holding a row.
    pub fn cached_count(&self) -> usize {
        self.used
    }

    /// Number of slots ever allocated. Slots are never freed, only reused.
    pub fn slot_capacity(&self) -> usize {
        self.slots.len()
    }

    /// Rows seen so far whose residual sum of squares is zero.
    pub fn degenerate_rows(&self) -> usize {
        self.degenerate_rows.load(Ordering::Relaxed)
    }

    /// Reads, centers and stores row `index`. A row that is already cached is left
    /// untouched.
    pub fn cache_row<S: MatrixSource>(
        &mut self,
        index: usize,
        source: &mut S,
        weights: &WeightModel,
    ) -> Result<(), CorrelationError> {
        if self.rows[index].slot.is_some() {
            return Ok(());
        }
        if self.used == self.slots.len() {
            self.slots.push(CacheSlot {
                values: vec![0.0; self.n_cols],
                owner: index,
            });
        }
        let slot_index = self.used;
        let slot = &mut self.slots[slot_index];
        slot.owner = index;
        source
            .read_row(index, &mut slot.values)
            .map_err(CorrelationError::source_error)?;

        let info = &self.rows[index];
        let stats = *info.stats.get_or_init(|| {
            let stats = RowStats::compute(&slot.values, weights);
            if stats.is_degenerate() {
                self.degenerate_rows.fetch_add(1, Ordering::Relaxed);
            }
            stats
        });
        center_in_place(&mut slot.values, stats.mean, weights);

        self.rows[index].slot = Some(slot_index);
        self.used += 1;
        Ok(())
    }

    /// Forgets every slot association without freeing storage, so the next block can
    /// reuse the slots.
    pub fn clear(&mut self) {
        for slot in &self.slots[..self.used] {
            self.rows[slot.owner].slot = None;
        }
        self.used = 0;
    }

    /// The cached centered row, if present.
    pub fn cached(&self, index: usize, retained: usize) -> Option<CenteredRow<'_>> {
        let info = &self.rows[index];
        let slot = &self.slots[info.slot?];
        debug_assert_eq!(slot.owner, index);
        let stats = info.stats.get()?;
        Some(CenteredRow {
            values: &slot.values[..retained],
            root_resid_sqr: stats.root_resid_sqr,
        })
    }

    /// A row the caller's bookkeeping guarantees is cached. A miss means the block
    /// fill and the compute phase disagree about which rows are resident; that is an
    /// engine bug and is reported as an internal error rather than papered over with
    /// a fresh read.
    pub fn require_cached(
        &self,
        index: usize,
        retained: usize,
    ) -> Result<CenteredRow<'_>, CorrelationError> {
        self.cached(index, retained)
            .ok_or(CorrelationError::CacheInvariant { row: index })
    }

    /// Reads and centers row `index` into a caller-owned scratch buffer without storing
    /// it in the cache. Statistics are memoized as usual. Returns the row's root
    /// residual sum of squares.
    pub fn load_transient<S: MatrixSource>(
        &self,
        index: usize,
        source: &mut S,
        weights: &WeightModel,
        scratch: &mut [f32],
    ) -> Result<f64, CorrelationError> {
        source
            .read_row(index, scratch)
            .map_err(CorrelationError::source_error)?;
        let stats = *self.rows[index].stats.get_or_init(|| {
            let stats = RowStats::compute(&scratch[..], weights);
            if stats.is_degenerate() {
                self.degenerate_rows.fetch_add(1, Ordering::Relaxed);
            }
            stats
        });
        center_in_place(scratch, stats.mean, weights);
        Ok(stats.root_resid_sqr)
    }
}

/// One transient row buffer per worker, indexed by worker id. Buffers are allocated
/// once and reused for every row the worker streams, across all blocks.
#[derive(Debug)]
pub struct ScratchRows {
    buffers: Vec<Mutex<Vec<f32>>>,
}

impl ScratchRows {
    pub fn new(workers: usize, n_cols: usize) -> Self {
        Self {
            buffers: (0..workers.max(1))
                .map(|_| Mutex::new(vec![0.0; n_cols]))
                .collect(),
        }
    }

    pub fn workers(&self) -> usize {
        self.buffers.len()
    }

    /// The buffer owned by `worker`. Each worker only ever locks its own buffer, so
    /// the lock is uncontended.
    pub fn acquire(&self, worker: usize) -> MutexGuard<'_, Vec<f32>> {
        self.buffers[worker % self.buffers.len()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
