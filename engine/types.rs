// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::fmt;

/// The index of a row in the input matrix, in `[0, n_rows)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OriginalRowIndex(pub usize);

/// A dense, 0-based index assigned to a selected row in traversal order. This is the
/// row index used when writing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompactRowIndex(pub usize);

impl fmt::Display for OriginalRowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}", self.0)
    }
}

impl fmt::Display for CompactRowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output row {}", self.0)
    }
}

/// One selected row: where it lives in the input and where it lands in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiIndexEntry {
    pub original: OriginalRowIndex,
    pub compact: CompactRowIndex,
}

/// The centered view of one row handed to the correlation kernel. `values` holds only
/// the retained columns; `root_resid_sqr` is the root of the (weighted) residual sum of
/// squares that normalizes the dot product.
#[derive(Debug, Clone, Copy)]
pub struct CenteredRow<'a> {
    pub values: &'a [f32],
    pub root_resid_sqr: f64,
}
