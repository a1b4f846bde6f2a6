//! Structural description of the row space.
//!
//! Rows of a matrix can be grouped into disjoint partitions: surface structures, where
//! each row is a vertex of a mesh, and volume structures, where each row is a voxel of
//! a shared 3D grid. The engine never interprets these; the layout only tells the ROI
//! index map which rows a selector refers to, and it travels to the output so that
//! downstream readers know what each output row means.

use serde::{Deserialize, Serialize};

/// Tolerance, relative to the largest transform entry, for treating two volume frames
/// as the same space.
const SFORM_RELATIVE_TOLERANCE: f32 = 1.0e-4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceRow {
    pub row: usize,
    pub vertex: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoxelRow {
    pub row: usize,
    pub ijk: [i64; 3],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfacePartition {
    pub structure: String,
    /// Vertices in the full mesh; a surface selector must have exactly this many values.
    pub vertex_count: usize,
    /// Rows belonging to this structure, in traversal order.
    pub rows: Vec<SurfaceRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumePartition {
    pub structure: String,
    /// Rows belonging to this structure, in traversal order.
    pub rows: Vec<VoxelRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Partition {
    Surface(SurfacePartition),
    Volume(VolumePartition),
}

impl Partition {
    pub fn structure(&self) -> &str {
        match self {
            Self::Surface(surface) => &surface.structure,
            Self::Volume(volume) => &volume.structure,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            Self::Surface(surface) => surface.rows.len(),
            Self::Volume(volume) => volume.rows.len(),
        }
    }
}

/// The voxel grid shared by all volume partitions: dimensions plus the 3x4 index to
/// world transform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpace {
    pub dims: [i64; 3],
    pub sform: [[f32; 4]; 3],
}

impl VolumeSpace {
    pub fn voxel_count(&self) -> usize {
        self.dims
            .iter()
            .map(|&d| usize::try_from(d).unwrap_or(0))
            .product()
    }

    /// Linear offset of a voxel, i fastest. `None` outside the grid.
    pub fn linear_index(&self, ijk: [i64; 3]) -> Option<usize> {
        for axis in 0..3 {
            if ijk[axis] < 0 || ijk[axis] >= self.dims[axis] {
                return None;
            }
        }
        let [i, j, k] = ijk.map(|v| v as usize);
        let [di, dj, _] = self.dims.map(|v| v as usize);
        Some(i + di * (j + dj * k))
    }

    /// Same grid dimensions and, up to a small relative tolerance, the same transform.
    pub fn matches(&self, other: &VolumeSpace) -> bool {
        if self.dims != other.dims {
            return false;
        }
        let scale = self
            .sform
            .iter()
            .chain(other.sform.iter())
            .flatten()
            .fold(1.0f32, |acc, v| acc.max(v.abs()));
        let tolerance = scale * SFORM_RELATIVE_TOLERANCE;
        self.sform
            .iter()
            .flatten()
            .zip(other.sform.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

/// Partitions of a matrix's rows plus the volume frame, if any partition is volumetric.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RowLayout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_space: Option<VolumeSpace>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl RowLayout {
    pub fn surfaces(&self) -> impl Iterator<Item = &SurfacePartition> {
        self.partitions.iter().filter_map(|p| match p {
            Partition::Surface(surface) => Some(surface),
            Partition::Volume(_) => None,
        })
    }

    pub fn volumes(&self) -> impl Iterator<Item = &VolumePartition> {
        self.partitions.iter().filter_map(|p| match p {
            Partition::Volume(volume) => Some(volume),
            Partition::Surface(_) => None,
        })
    }

    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(Partition::row_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> VolumeSpace {
        VolumeSpace {
            dims: [4, 3, 2],
            sform: [[2.0, 0.0, 0.0, -90.0], [0.0, 2.0, 0.0, -126.0], [0.0, 0.0, 2.0, -72.0]],
        }
    }

    #[test]
    fn linear_index_is_i_fastest() {
        let s = space();
        assert_eq!(s.voxel_count(), 24);
        assert_eq!(s.linear_index([0, 0, 0]), Some(0));
        assert_eq!(s.linear_index([1, 0, 0]), Some(1));
        assert_eq!(s.linear_index([0, 1, 0]), Some(4));
        assert_eq!(s.linear_index([3, 2, 1]), Some(23));
        assert_eq!(s.linear_index([4, 0, 0]), None);
        assert_eq!(s.linear_index([0, -1, 0]), None);
    }

    #[test]
    fn spaces_match_within_tolerance_only() {
        let a = space();
        let mut b = space();
        b.sform[0][3] += 1.0e-4;
        assert!(a.matches(&b));

        b.sform[0][3] += 1.0;
        assert!(!a.matches(&b));

        let mut c = space();
        c.dims = [4, 3, 3];
        assert!(!a.matches(&c));
    }

    #[test]
    fn layout_round_trips_through_toml() {
        let layout = RowLayout {
            volume_space: Some(space()),
            partitions: vec![
                Partition::Surface(SurfacePartition {
                    structure: "CORTEX_LEFT".into(),
                    vertex_count: 5,
                    rows: vec![SurfaceRow { row: 0, vertex: 1 }, SurfaceRow { row: 1, vertex: 4 }],
                }),
                Partition::Volume(VolumePartition {
                    structure: "THALAMUS_LEFT".into(),
                    rows: vec![VoxelRow { row: 2, ijk: [1, 2, 0] }],
                }),
            ],
        };
        let text = toml::to_string(&layout).unwrap();
        let parsed: RowLayout = toml::from_str(&text).unwrap();
        assert_eq!(parsed, layout);
        assert_eq!(parsed.row_count(), 3);
        assert_eq!(parsed.surfaces().count(), 1);
        assert_eq!(parsed.volumes().count(), 1);
    }
}
