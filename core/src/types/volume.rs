use super::geometry::Geometry;
use ndarray::Array3;
use std::collections::BTreeSet;

/// Label map of a segmentation volume
///
/// `data` is indexed `[z, y, x]` and must match `geometry.size`. Label 0 is
/// background; every other value identifies one exclusive segment.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelVolume {
    pub data: Array3<u16>,
    pub geometry: Geometry,
}

impl LabelVolume {
    /// Creates a volume, checking the array shape against the geometry
    pub fn new(data: Array3<u16>, geometry: Geometry) -> Result<Self, String> {
        let expected = (geometry.size[2], geometry.size[1], geometry.size[0]);
        if data.dim() != expected {
            return Err(format!(
                "label array shape {:?} does not match geometry size {:?}",
                data.dim(),
                geometry.size
            ));
        }
        Ok(Self { data, geometry })
    }

    /// Creates an all-background volume on the given grid
    pub fn zeros(geometry: Geometry) -> Self {
        let data = Array3::zeros((geometry.size[2], geometry.size[1], geometry.size[0]));
        Self { data, geometry }
    }

    /// Dimensions of the label array (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Label at voxel `(x, y, z)`
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<u16> {
        self.data.get((z, y, x)).copied()
    }

    /// Sorted distinct non-zero labels present in the volume
    pub fn labels(&self) -> Vec<u16> {
        self.data
            .iter()
            .copied()
            .filter(|&v| v != 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether the volume holds background only
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&v| v == 0)
    }
}
