// ========================================================================================
//
//                                 ROI INDEX COMPACTION
//
// ========================================================================================
//
// Maps "rows selected by a region of interest" to dense output positions. Selectors are
// given per structural partition; a row is selected when its selector value is > 0.
// Surface partitions are visited first, then volume partitions, each in layout order,
// and within a partition rows are visited in the order the layout lists them. Compact
// indices are handed out in exactly that order.

use crate::error::ValidationError;
use crate::layout::{
    Partition, RowLayout, SurfacePartition, SurfaceRow, VolumePartition, VolumeSpace, VoxelRow,
};
use crate::types::{CompactRowIndex, OriginalRowIndex, RoiIndexEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A real-valued mask over every vertex of one surface structure.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceSelector {
    pub values: Vec<f32>,
}

/// A real-valued mask over a voxel grid, with the frame it was defined in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeSelector {
    pub space: VolumeSpace,
    pub values: Vec<f32>,
}

/// The ROI override: optional surface masks keyed by structure name, plus one optional
/// volume mask shared by every volume partition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoiSelectors {
    pub surfaces: BTreeMap<String, SurfaceSelector>,
    pub volume: Option<VolumeSelector>,
}

impl RoiSelectors {
    pub fn with_surface(mut self, structure: impl Into<String>, values: Vec<f32>) -> Self {
        self.surfaces
            .insert(structure.into(), SurfaceSelector { values });
        self
    }

    pub fn with_volume(mut self, selector: VolumeSelector) -> Self {
        self.volume = Some(selector);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty() && self.volume.is_none()
    }
}

/// The ordered list of selected rows and the structural description of the output rows.
#[derive(Clone, Debug, PartialEq)]
pub struct RoiIndexMap {
    entries: Vec<RoiIndexEntry>,
    output_layout: Option<RowLayout>,
}

impl RoiIndexMap {
    /// Every row, in row order. The output rows are the input rows, so the input layout
    /// (if any) describes them as-is.
    pub fn all_rows(n_rows: usize, layout: Option<&RowLayout>) -> Self {
        let entries = (0..n_rows)
            .map(|row| RoiIndexEntry {
                original: OriginalRowIndex(row),
                compact: CompactRowIndex(row),
            })
            .collect();
        Self {
            entries,
            output_layout: layout.cloned(),
        }
    }

    /// Compacts the rows selected by `selectors`. Fails on selector/partition size
    /// mismatches, frame mismatches, layouts that point outside the matrix or list a row
    /// twice, and a
    /// selection that is empty across every partition.
    pub fn build(
        layout: &RowLayout,
        selectors: &RoiSelectors,
        n_rows: usize,
    ) -> Result<Self, ValidationError> {
        check_layout_rows(layout, n_rows)?;

        let mut entries = Vec::new();
        let mut partitions = Vec::new();

        for surface in layout.surfaces() {
            let Some(selector) = selectors.surfaces.get(&surface.structure) else {
                continue;
            };
            if selector.values.len() != surface.vertex_count {
                return Err(ValidationError::SurfaceSelectorLength {
                    structure: surface.structure.clone(),
                    expected: surface.vertex_count,
                    found: selector.values.len(),
                });
            }
            let mut kept = Vec::new();
            for entry in &surface.rows {
                let value = selector.values.get(entry.vertex).ok_or_else(|| {
                    ValidationError::LayoutLocationOutOfRange {
                        structure: surface.structure.clone(),
                        detail: format!(
                            "vertex {} of a {}-vertex mesh",
                            entry.vertex, surface.vertex_count
                        ),
                    }
                })?;
                if *value > 0.0 {
                    kept.push(SurfaceRow {
                        row: entries.len(),
                        vertex: entry.vertex,
                    });
                    push_entry(&mut entries, entry.row);
                }
            }
            if !kept.is_empty() {
                partitions.push(Partition::Surface(SurfacePartition {
                    structure: surface.structure.clone(),
                    vertex_count: surface.vertex_count,
                    rows: kept,
                }));
            }
        }

        let mut volume_space = None;
        if let Some(selector) = &selectors.volume {
            let space = layout
                .volume_space
                .as_ref()
                .ok_or(ValidationError::MissingVolumeSpace)?;
            if !selector.space.matches(space) {
                return Err(ValidationError::VolumeSpaceMismatch);
            }
            let expected = selector.space.voxel_count();
            if selector.values.len() != expected {
                return Err(ValidationError::VolumeSelectorLength {
                    expected,
                    found: selector.values.len(),
                });
            }
            for volume in layout.volumes() {
                let mut kept = Vec::new();
                for entry in &volume.rows {
                    let offset = space.linear_index(entry.ijk).ok_or_else(|| {
                        ValidationError::LayoutLocationOutOfRange {
                            structure: volume.structure.clone(),
                            detail: format!("voxel {:?} outside dims {:?}", entry.ijk, space.dims),
                        }
                    })?;
                    if selector.values[offset] > 0.0 {
                        kept.push(VoxelRow {
                            row: entries.len(),
                            ijk: entry.ijk,
                        });
                        push_entry(&mut entries, entry.row);
                    }
                }
                if !kept.is_empty() {
                    partitions.push(Partition::Volume(VolumePartition {
                        structure: volume.structure.clone(),
                        rows: kept,
                    }));
                }
            }
            if partitions.iter().any(|p| matches!(p, Partition::Volume(_))) {
                volume_space = Some(space.clone());
            }
        }

        if entries.is_empty() {
            return Err(ValidationError::EmptyRoiSelection);
        }
        Ok(Self {
            entries,
            output_layout: Some(RowLayout {
                volume_space,
                partitions,
            }),
        })
    }

    pub fn entries(&self) -> &[RoiIndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Layout of the output rows: only partitions that kept at least one row, with row
    /// indices rewritten to compact output indices.
    pub fn output_layout(&self) -> Option<&RowLayout> {
        self.output_layout.as_ref()
    }
}

fn push_entry(entries: &mut Vec<RoiIndexEntry>, original: usize) {
    let compact = CompactRowIndex(entries.len());
    entries.push(RoiIndexEntry {
        original: OriginalRowIndex(original),
        compact,
    });
}

/// Every layout row must lie inside the matrix and appear in exactly one partition entry.
fn check_layout_rows(layout: &RowLayout, n_rows: usize) -> Result<(), ValidationError> {
    let mut seen = vec![false; n_rows];
    for partition in &layout.partitions {
        let rows: Box<dyn Iterator<Item = usize> + '_> = match partition {
            Partition::Surface(surface) => Box::new(surface.rows.iter().map(|r| r.row)),
            Partition::Volume(volume) => Box::new(volume.rows.iter().map(|r| r.row)),
        };
        for row in rows {
            if row >= n_rows {
                return Err(ValidationError::LayoutRowOutOfRange {
                    structure: partition.structure().to_string(),
                    row,
                    n_rows,
                });
            }
            if std::mem::replace(&mut seen[row], true) {
                return Err(ValidationError::LayoutRowDuplicated {
                    structure: partition.structure().to_string(),
                    row,
                });
            }
        }
    }
    Ok(())
}
