// ========================================================================================
//
//                          ON-DISK MATRICES, LAYOUTS AND MASKS
//
// ========================================================================================
//
// ### Matrix file (`.rcm`) ###
//
//   bytes  0..8    magic "RCORRMAT"
//   bytes  8..16   row count, little-endian u64
//   bytes 16..24   column count, little-endian u64
//   bytes 24..     row-major little-endian f32 values
//
// Inputs are read through a read-only memory map, so a matrix much larger than RAM
// costs only the pages the engine touches. Outputs are created at their final size and
// filled through a writable map.
//
// ### Sidecars ###
//
// A matrix's structural layout lives next to it in `<matrix>.layout.toml`. Surface ROI
// masks are plain float lists; volume ROI masks are TOML carrying their own frame.

use crate::error::ValidationError;
use crate::layout::RowLayout;
use crate::roi::VolumeSelector;
use crate::source::{DenseMatrix, MatrixSink, MatrixSource};
use crate::weights::parse_float_list;
use memmap2::{Mmap, MmapMut};
use ndarray::{Array2, ArrayView2};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MATRIX_MAGIC: &[u8; 8] = b"RCORRMAT";
pub const MATRIX_HEADER_LEN: usize = 24;
const LAYOUT_SUFFIX: &str = ".layout.toml";

#[derive(Debug, Error)]
pub enum MatrixIoError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("'{0}' is not a row matrix file (bad magic)")]
    BadMagic(PathBuf),
    #[error("matrix file '{path}' should be {expected} bytes for its declared shape, found {found}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
    #[error("a {rows} x {cols} matrix is too large to address on this platform")]
    ShapeOverflow { rows: u64, cols: u64 },
    #[error("row {index} is out of range for a matrix with {n_rows} rows")]
    RowOutOfRange { index: usize, n_rows: usize },
    #[error("row buffer has {found} values, expected {expected}")]
    RowLength { expected: usize, found: usize },
    #[error("failed to parse layout '{path}': {source}")]
    LayoutParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize layout for '{path}': {source}")]
    LayoutSerialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> MatrixIoError + '_ {
    move |source| MatrixIoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Total file length for a matrix of the given shape.
fn file_len(rows: u64, cols: u64) -> Result<u64, MatrixIoError> {
    rows.checked_mul(cols)
        .and_then(|cells| cells.checked_mul(4))
        .and_then(|bytes| bytes.checked_add(MATRIX_HEADER_LEN as u64))
        .filter(|&len| usize::try_from(len).is_ok())
        .ok_or(MatrixIoError::ShapeOverflow { rows, cols })
}

fn encode_header(rows: usize, cols: usize) -> [u8; MATRIX_HEADER_LEN] {
    let mut header = [0u8; MATRIX_HEADER_LEN];
    header[..8].copy_from_slice(MATRIX_MAGIC);
    header[8..16].copy_from_slice(&(rows as u64).to_le_bytes());
    header[16..24].copy_from_slice(&(cols as u64).to_le_bytes());
    header
}

// ========================================================================================
//                                   MATRIX READER
// ========================================================================================

/// A matrix file mapped read-only. Rows are decoded on demand.
pub struct MappedMatrix {
    mmap: Mmap,
    n_rows: usize,
    n_cols: usize,
    layout: Option<RowLayout>,
}

impl MappedMatrix {
    /// Validates the header and file size, maps the file, and loads the layout sidecar
    /// if one exists.
    pub fn open(path: &Path) -> Result<Self, MatrixIoError> {
        let mut file = File::open(path).map_err(io_error(path))?;
        let found = file.metadata().map_err(io_error(path))?.len();

        let mut header = [0u8; MATRIX_HEADER_LEN];
        if found < MATRIX_HEADER_LEN as u64 {
            return Err(MatrixIoError::SizeMismatch {
                path: path.to_path_buf(),
                expected: MATRIX_HEADER_LEN as u64,
                found,
            });
        }
        file.read_exact(&mut header).map_err(io_error(path))?;
        if &header[..8] != MATRIX_MAGIC {
            return Err(MatrixIoError::BadMagic(path.to_path_buf()));
        }
        let rows = read_u64(&header[8..16]);
        let cols = read_u64(&header[16..24]);
        let expected = file_len(rows, cols)?;
        if found != expected {
            return Err(MatrixIoError::SizeMismatch {
                path: path.to_path_buf(),
                expected,
                found,
            });
        }

        // The size check above guarantees every row offset lies inside the map.
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_error(path))?;
        let layout = read_layout(path)?;

        Ok(Self {
            mmap,
            n_rows: rows as usize,
            n_cols: cols as usize,
            layout,
        })
    }

    fn row_bytes(&self, index: usize) -> &[u8] {
        let width = self.n_cols * 4;
        let start = MATRIX_HEADER_LEN + index * width;
        &self.mmap[start..start + width]
    }

    /// Copies the whole matrix into memory. The result counts against the engine's
    /// memory budget as resident input.
    pub fn load_into_memory(mut self) -> Result<DenseMatrix, MatrixIoError> {
        let mut data = Array2::zeros((self.n_rows, self.n_cols));
        for (index, mut row) in data.rows_mut().into_iter().enumerate() {
            decode_row(self.row_bytes(index), row.iter_mut());
        }
        let mut dense = DenseMatrix::new(data);
        dense.set_layout(self.layout.take());
        Ok(dense)
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn decode_row<'a>(bytes: &[u8], out: impl Iterator<Item = &'a mut f32>) {
    for (dest, chunk) in out.zip(bytes.chunks_exact(4)) {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(chunk);
        *dest = f32::from_le_bytes(buf);
    }
}

impl MatrixSource for MappedMatrix {
    type Error = MatrixIoError;

    fn n_rows(&self) -> usize {
        self.n_rows
    }

    fn n_cols(&self) -> usize {
        self.n_cols
    }

    fn read_row(&mut self, index: usize, out: &mut [f32]) -> Result<(), Self::Error> {
        if index >= self.n_rows {
            return Err(MatrixIoError::RowOutOfRange {
                index,
                n_rows: self.n_rows,
            });
        }
        if out.len() != self.n_cols {
            return Err(MatrixIoError::RowLength {
                expected: self.n_cols,
                found: out.len(),
            });
        }
        decode_row(self.row_bytes(index), out.iter_mut());
        Ok(())
    }

    fn layout(&self) -> Option<&RowLayout> {
        self.layout.as_ref()
    }
}

// ========================================================================================
//                                   MATRIX WRITER
// ========================================================================================

/// An output matrix file created at its final size. Rows may be written in any order;
/// rows never written stay zero.
pub struct MatrixFileWriter {
    path: PathBuf,
    mmap: MmapMut,
    n_rows: usize,
    n_cols: usize,
}

impl MatrixFileWriter {
    pub fn create(path: &Path, n_rows: usize, n_cols: usize) -> Result<Self, MatrixIoError> {
        let len = file_len(n_rows as u64, n_cols as u64)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_error(path))?;
        file.set_len(len).map_err(io_error(path))?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(io_error(path))?;
        mmap[..MATRIX_HEADER_LEN].copy_from_slice(&encode_header(n_rows, n_cols));
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            n_rows,
            n_cols,
        })
    }

    /// Flushes every written row to disk.
    pub fn finish(self) -> Result<(), MatrixIoError> {
        self.mmap.flush().map_err(io_error(&self.path))
    }
}

impl MatrixSink for MatrixFileWriter {
    type Error = MatrixIoError;

    fn write_row(&mut self, index: usize, values: &[f32]) -> Result<(), Self::Error> {
        if index >= self.n_rows {
            return Err(MatrixIoError::RowOutOfRange {
                index,
                n_rows: self.n_rows,
            });
        }
        if values.len() != self.n_cols {
            return Err(MatrixIoError::RowLength {
                expected: self.n_cols,
                found: values.len(),
            });
        }
        let width = self.n_cols * 4;
        let start = MATRIX_HEADER_LEN + index * width;
        for (chunk, value) in self.mmap[start..start + width]
            .chunks_exact_mut(4)
            .zip(values)
        {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }
}

/// Writes a whole in-memory matrix, plus its layout sidecar when given.
pub fn write_matrix_file(
    path: &Path,
    data: ArrayView2<'_, f32>,
    layout: Option<&RowLayout>,
) -> Result<(), MatrixIoError> {
    let (rows, cols) = data.dim();
    let mut writer = MatrixFileWriter::create(path, rows, cols)?;
    let mut buffer = vec![0.0f32; cols];
    for (index, row) in data.rows().into_iter().enumerate() {
        buffer.iter_mut().zip(row).for_each(|(b, &v)| *b = v);
        writer.write_row(index, &buffer)?;
    }
    writer.finish()?;
    if let Some(layout) = layout {
        write_layout(path, layout)?;
    }
    Ok(())
}

// ========================================================================================
//                                  LAYOUT SIDECAR
// ========================================================================================

pub fn layout_path(matrix_path: &Path) -> PathBuf {
    let mut name: OsString = matrix_path.as_os_str().to_owned();
    name.push(LAYOUT_SUFFIX);
    PathBuf::from(name)
}

/// The layout stored next to `matrix_path`, if any.
pub fn read_layout(matrix_path: &Path) -> Result<Option<RowLayout>, MatrixIoError> {
    let path = layout_path(matrix_path);
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).map_err(io_error(&path))?;
    toml::from_str(&text)
        .map(Some)
        .map_err(|source| MatrixIoError::LayoutParse { path, source })
}

pub fn write_layout(matrix_path: &Path, layout: &RowLayout) -> Result<(), MatrixIoError> {
    let path = layout_path(matrix_path);
    let text = toml::to_string_pretty(layout).map_err(|source| MatrixIoError::LayoutSerialize {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, text).map_err(io_error(&path))
}

// ========================================================================================
//                                     ROI MASKS
// ========================================================================================

fn mask_error(path: &Path, message: impl ToString) -> ValidationError {
    ValidationError::MaskFile {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// A surface mask: whitespace-separated floats, one per vertex of the structure.
pub fn load_surface_mask(path: &Path) -> Result<Vec<f32>, ValidationError> {
    let text = fs::read_to_string(path).map_err(|e| mask_error(path, e))?;
    Ok(parse_float_list(&text))
}

/// A volume mask: TOML with the frame (`space`) and one value per voxel, i fastest.
pub fn load_volume_mask(path: &Path) -> Result<VolumeSelector, ValidationError> {
    let text = fs::read_to_string(path).map_err(|e| mask_error(path, e))?;
    toml::from_str(&text).map_err(|e| mask_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Partition, SurfacePartition, SurfaceRow, VolumeSpace};
    use ndarray::array;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn matrix_file_round_trips_with_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.rcm");
        let data = array![[1.0f32, 2.5, -3.0], [0.0, 4.0, 1.0e-7]];
        let layout = RowLayout {
            volume_space: None,
            partitions: vec![Partition::Surface(SurfacePartition {
                structure: "CORTEX_LEFT".into(),
                vertex_count: 3,
                rows: vec![SurfaceRow { row: 0, vertex: 0 }, SurfaceRow { row: 1, vertex: 2 }],
            })],
        };
        write_matrix_file(&path, data.view(), Some(&layout)).unwrap();
        assert!(layout_path(&path).exists());

        let mut matrix = MappedMatrix::open(&path).unwrap();
        assert_eq!((matrix.n_rows(), matrix.n_cols()), (2, 3));
        assert!(!matrix.is_memory_resident());
        assert_eq!(matrix.layout(), Some(&layout));

        let mut row = [0.0; 3];
        matrix.read_row(1, &mut row).unwrap();
        assert_eq!(row, [0.0, 4.0, 1.0e-7]);
        assert!(matches!(
            matrix.read_row(2, &mut row),
            Err(MatrixIoError::RowOutOfRange { index: 2, n_rows: 2 })
        ));

        let dense = matrix.load_into_memory().unwrap();
        assert!(dense.is_memory_resident());
        assert_eq!(dense.data(), &data);
        assert_eq!(dense.layout(), Some(&layout));
    }

    #[test]
    fn truncated_and_foreign_files_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.rcm");
        write_matrix_file(&path, array![[1.0f32, 2.0], [3.0, 4.0]].view(), None).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        assert!(matches!(
            MappedMatrix::open(&path),
            Err(MatrixIoError::SizeMismatch { expected: 40, found: 36, .. })
        ));

        let mut foreign = NamedTempFile::new().unwrap();
        foreign.write_all(&[0u8; 32]).unwrap();
        assert!(matches!(
            MappedMatrix::open(foreign.path()),
            Err(MatrixIoError::BadMagic(_))
        ));
    }

    #[test]
    fn writer_leaves_unwritten_rows_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.rcm");
        let mut writer = MatrixFileWriter::create(&path, 3, 2).unwrap();
        writer.write_row(2, &[5.0, 6.0]).unwrap();
        assert!(matches!(
            writer.write_row(0, &[1.0]),
            Err(MatrixIoError::RowLength { expected: 2, found: 1 })
        ));
        writer.finish().unwrap();

        let dense = MappedMatrix::open(&path).unwrap().load_into_memory().unwrap();
        assert_eq!(dense.data(), &array![[0.0f32, 0.0], [0.0, 0.0], [5.0, 6.0]]);
    }

    #[test]
    fn masks_load_from_text_and_toml() {
        let mut surface = NamedTempFile::new().unwrap();
        writeln!(surface, "0 1\n1 0 end").unwrap();
        assert_eq!(
            load_surface_mask(surface.path()).unwrap(),
            vec![0.0, 1.0, 1.0, 0.0]
        );

        let selector = VolumeSelector {
            space: VolumeSpace {
                dims: [2, 1, 1],
                sform: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
            },
            values: vec![0.0, 2.0],
        };
        let mut volume = NamedTempFile::new().unwrap();
        write!(volume, "{}", toml::to_string(&selector).unwrap()).unwrap();
        assert_eq!(load_volume_mask(volume.path()).unwrap(), selector);

        assert!(matches!(
            load_surface_mask(Path::new("/nonexistent/rowcorr/mask.txt")),
            Err(ValidationError::MaskFile { .. })
        ));
    }
}
