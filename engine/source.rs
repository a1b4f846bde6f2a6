use crate::layout::RowLayout;
use ndarray::Array2;
use std::error::Error;
use thiserror::Error;

/// A row-oriented matrix the engine reads from.
///
/// The engine wraps every source in a mutex and fetches rows strictly one at a time,
/// in ascending order within each pass over the matrix. Implementations therefore do
/// not need to support concurrent reads; a source that could would let that lock be
/// relaxed.
pub trait MatrixSource {
    type Error: Error + Send + Sync + 'static;

    fn n_rows(&self) -> usize;
    fn n_cols(&self) -> usize;

    /// Fills `out` (exactly `n_cols` long) with row `index`.
    fn read_row(&mut self, index: usize, out: &mut [f32]) -> Result<(), Self::Error>;

    /// Whether the whole matrix already lives in memory. Resident input counts against
    /// the engine's memory budget even though the engine did not allocate it.
    fn is_memory_resident(&self) -> bool {
        false
    }

    /// The structural partitions of the row space, needed for ROI selection.
    fn layout(&self) -> Option<&RowLayout> {
        None
    }
}

/// Where completed output rows go.
pub trait MatrixSink {
    type Error: Error + Send + Sync + 'static;

    fn write_row(&mut self, index: usize, values: &[f32]) -> Result<(), Self::Error>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DenseMatrixError {
    #[error("row {index} is out of range for a matrix with {n_rows} rows")]
    RowOutOfRange { index: usize, n_rows: usize },
    #[error("row {index} has {found} values, expected {expected}")]
    RowLength {
        index: usize,
        expected: usize,
        found: usize,
    },
}

/// A fully memory-resident matrix, usable both as input and as output.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseMatrix {
    data: Array2<f32>,
    layout: Option<RowLayout>,
}

impl DenseMatrix {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data, layout: None }
    }

    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self::new(Array2::zeros((n_rows, n_cols)))
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, DenseMatrixError> {
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Array2::zeros((rows.len(), n_cols));
        for (index, (row, mut dest)) in rows.iter().zip(data.rows_mut()).enumerate() {
            if row.len() != n_cols {
                return Err(DenseMatrixError::RowLength {
                    index,
                    expected: n_cols,
                    found: row.len(),
                });
            }
            dest.iter_mut().zip(row).for_each(|(d, &v)| *d = v);
        }
        Ok(Self::new(data))
    }

    pub fn with_layout(mut self, layout: RowLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn set_layout(&mut self, layout: Option<RowLayout>) {
        self.layout = layout;
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn into_data(self) -> Array2<f32> {
        self.data
    }

    fn check_row(&self, index: usize, len: usize) -> Result<(), DenseMatrixError> {
        let (n_rows, n_cols) = self.data.dim();
        if index >= n_rows {
            return Err(DenseMatrixError::RowOutOfRange { index, n_rows });
        }
        if len != n_cols {
            return Err(DenseMatrixError::RowLength {
                index,
                expected: n_cols,
                found: len,
            });
        }
        Ok(())
    }
}

impl MatrixSource for DenseMatrix {
    type Error = DenseMatrixError;

    fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    fn n_cols(&self) -> usize {
        self.data.ncols()
    }

    fn read_row(&mut self, index: usize, out: &mut [f32]) -> Result<(), Self::Error> {
        self.check_row(index, out.len())?;
        out.iter_mut()
            .zip(self.data.row(index))
            .for_each(|(o, &v)| *o = v);
        Ok(())
    }

    fn is_memory_resident(&self) -> bool {
        true
    }

    fn layout(&self) -> Option<&RowLayout> {
        self.layout.as_ref()
    }
}

impl MatrixSink for DenseMatrix {
    type Error = DenseMatrixError;

    fn write_row(&mut self, index: usize, values: &[f32]) -> Result<(), Self::Error> {
        self.check_row(index, values.len())?;
        self.data
            .row_mut(index)
            .iter_mut()
            .zip(values)
            .for_each(|(d, &v)| *d = v);
        Ok(())
    }
}
