use std::error::Error;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Problems with the caller's inputs. These are always raised before any row is read
/// from the source, so a caller that sees one can fix the inputs and retry with no
/// partial output to clean up.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("the input matrix is empty ({rows} rows, {cols} columns)")]
    EmptyMatrix { rows: usize, cols: usize },

    #[error(
        "number of weights doesn't match length of a row, number of weights given: {found} (expected {expected})"
    )]
    WeightCountMismatch { expected: usize, found: usize },

    #[error("weights cannot be negative (column {column} has weight {value})")]
    NegativeWeight { column: usize, value: f32 },

    #[error("weights must be finite (column {column} has weight {value})")]
    NonFiniteWeight { column: usize, value: f32 },

    #[error("every weight is zero, no columns are left to correlate")]
    NoRetainedColumns,

    #[error("weight list file '{0}' doesn't exist")]
    WeightFileMissing(PathBuf),

    #[error("error reading weight list file '{path}': {source}")]
    WeightFileUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("memory limit cannot be negative or non-finite (got {0} GB)")]
    InvalidMemoryLimit(f64),

    #[error("full-cache fraction must be in (0, 1], got {0}")]
    InvalidCacheFraction(f64),

    #[error("thread count must be at least 1")]
    InvalidThreadCount,

    #[error("cannot use ROIs on this matrix, its rows carry no structural layout")]
    MissingLayout,

    #[error(
        "surface roi has the wrong number of vertices for structure {structure} (expected {expected}, found {found})"
    )]
    SurfaceSelectorLength {
        structure: String,
        expected: usize,
        found: usize,
    },

    #[error("volume roi has {found} values but its frame declares {expected} voxels")]
    VolumeSelectorLength { expected: usize, found: usize },

    #[error("roi volume space doesn't match the matrix volume space")]
    VolumeSpaceMismatch,

    #[error("a volume roi was given but the matrix has no volume space")]
    MissingVolumeSpace,

    #[error("layout partition {structure} refers to row {row}, but the matrix has {n_rows} rows")]
    LayoutRowOutOfRange {
        structure: String,
        row: usize,
        n_rows: usize,
    },

    #[error("layout partition {structure} lists row {row}, which another entry already claims")]
    LayoutRowDuplicated { structure: String, row: usize },

    #[error("layout partition {structure} refers to a location outside its extent: {detail}")]
    LayoutLocationOutOfRange { structure: String, detail: String },

    #[error("the roi selects no rows in any structure")]
    EmptyRoiSelection,

    #[error("error reading mask file '{path}': {message}")]
    MaskFile { path: PathBuf, message: String },
}

/// Everything that can stop a correlation run.
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("matrix source error: {0}")]
    Source(Box<dyn Error + Send + Sync + 'static>),

    #[error("matrix sink error: {0}")]
    Sink(Box<dyn Error + Send + Sync + 'static>),

    #[error(
        "internal error: row {row} must be cached during block compute but is absent; block bookkeeping is inconsistent"
    )]
    CacheInvariant { row: usize },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("could not build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl CorrelationError {
    pub(crate) fn source_error<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Source(Box::new(err))
    }

    pub(crate) fn sink_error<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Sink(Box::new(err))
    }

    /// True for failures the caller can fix by changing inputs.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// True for failures that indicate a bug in the engine itself.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::CacheInvariant { .. } | Self::Internal(_))
    }
}
