use std::fmt;

/// Tolerance used when comparing two sampling grids
///
/// Millimetres for origin and spacing, unitless for direction cosines.
pub const GEOMETRY_TOLERANCE: f64 = 1e-4;

/// 3x3 matrix stored row-major
pub type Matrix3 = [[f64; 3]; 3];

/// Identity direction matrix
pub const IDENTITY: Matrix3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Sampling grid of a 3D volume in patient coordinates (LPS, millimetres)
///
/// A voxel index `(i, j, k)` maps to the physical point
/// `origin + direction * (spacing ⊙ (i, j, k))`. Column `c` of `direction`
/// is the unit vector of index axis `c`. `size` is `(x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub origin: [f64; 3],
    pub spacing: [f64; 3],
    pub direction: Matrix3,
    pub size: [usize; 3],
}

impl Geometry {
    /// Creates a new Geometry
    pub fn new(origin: [f64; 3], spacing: [f64; 3], direction: Matrix3, size: [usize; 3]) -> Self {
        Self {
            origin,
            spacing,
            direction,
            size,
        }
    }

    /// Creates a grid aligned with the patient axes
    pub fn axis_aligned(origin: [f64; 3], spacing: [f64; 3], size: [usize; 3]) -> Self {
        Self::new(origin, spacing, IDENTITY, size)
    }

    /// Number of voxels in the grid
    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    /// Checks spacing is positive and the grid holds at least one voxel
    pub fn is_valid(&self) -> bool {
        self.spacing.iter().all(|s| s.is_finite() && *s > 0.0)
            && self.voxel_count() > 0
            && invert(&self.direction).is_some()
    }

    /// Maps a (continuous) voxel index to a physical point
    pub fn index_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        let scaled = [
            index[0] * self.spacing[0],
            index[1] * self.spacing[1],
            index[2] * self.spacing[2],
        ];
        let rotated = mat_vec(&self.direction, scaled);
        [
            self.origin[0] + rotated[0],
            self.origin[1] + rotated[1],
            self.origin[2] + rotated[2],
        ]
    }

    /// Matrix mapping a physical offset from the origin to a continuous index
    ///
    /// Returns `None` for a degenerate grid.
    pub fn physical_to_index_matrix(&self) -> Option<Matrix3> {
        // (D * diag(spacing))^-1 = diag(1 / spacing) * D^-1
        let mut m = invert(&self.direction)?;
        for (row, spacing) in m.iter_mut().zip(self.spacing.iter()) {
            for value in row.iter_mut() {
                *value /= spacing;
            }
        }
        Some(m)
    }

    /// Whether two grids are equal within [`GEOMETRY_TOLERANCE`]
    pub fn approx_eq(&self, other: &Geometry) -> bool {
        self.size == other.size
            && close(&self.origin, &other.origin)
            && close(&self.spacing, &other.spacing)
            && self
                .direction
                .iter()
                .zip(other.direction.iter())
                .all(|(a, b)| close(a, b))
    }

    /// Physical axis-aligned bounding box covering every voxel
    ///
    /// Voxels are treated as cells of one spacing centred on their index.
    pub fn bounds(&self) -> ([f64; 3], [f64; 3]) {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for corner in 0..8 {
            let index = [
                if corner & 1 == 0 { -0.5 } else { self.size[0] as f64 - 0.5 },
                if corner & 2 == 0 { -0.5 } else { self.size[1] as f64 - 0.5 },
                if corner & 4 == 0 { -0.5 } else { self.size[2] as f64 - 0.5 },
            ];
            let point = self.index_to_physical(index);
            for axis in 0..3 {
                min[axis] = min[axis].min(point[axis]);
                max[axis] = max[axis].max(point[axis]);
            }
        }
        (min, max)
    }

    /// Volume (mm³) of the intersection of both bounding boxes
    pub fn overlap_volume(&self, other: &Geometry) -> f64 {
        let (a_min, a_max) = self.bounds();
        let (b_min, b_max) = other.bounds();
        (0..3)
            .map(|axis| (a_max[axis].min(b_max[axis]) - a_min[axis].max(b_min[axis])).max(0.0))
            .product()
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} voxels, spacing ({:.3}, {:.3}, {:.3}) mm, origin ({:.2}, {:.2}, {:.2})",
            self.size[0],
            self.size[1],
            self.size[2],
            self.spacing[0],
            self.spacing[1],
            self.spacing[2],
            self.origin[0],
            self.origin[1],
            self.origin[2]
        )
    }
}

fn close(a: &[f64; 3], b: &[f64; 3]) -> bool {
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| (x - y).abs() <= GEOMETRY_TOLERANCE)
}

/// Multiplies a row-major matrix by a column vector
pub fn mat_vec(m: &Matrix3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Cross product of two vectors
pub fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Dot product of two vectors
pub fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Inverts a 3x3 matrix, `None` when it is singular
pub fn invert(m: &Matrix3) -> Option<Matrix3> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_to_physical_axis_aligned() {
        let g = Geometry::axis_aligned([10.0, 20.0, 30.0], [0.5, 0.5, 2.0], [4, 4, 3]);
        assert_eq!(g.index_to_physical([0.0, 0.0, 0.0]), [10.0, 20.0, 30.0]);
        assert_eq!(g.index_to_physical([2.0, 1.0, 2.0]), [11.0, 20.5, 34.0]);
    }

    #[test]
    fn test_physical_to_index_roundtrip_rotated() {
        // x axis points along -y, y axis along +x
        let direction = [[0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let g = Geometry::new([5.0, -3.0, 1.0], [2.0, 1.0, 3.0], direction, [8, 8, 8]);
        let m = g.physical_to_index_matrix().unwrap();

        let p = g.index_to_physical([3.0, 5.0, 2.0]);
        let offset = [p[0] - g.origin[0], p[1] - g.origin[1], p[2] - g.origin[2]];
        let index = mat_vec(&m, offset);

        assert!((index[0] - 3.0).abs() < 1e-9);
        assert!((index[1] - 5.0).abs() < 1e-9);
        assert!((index[2] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_approx_eq_within_tolerance() {
        let a = Geometry::axis_aligned([0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2, 2, 2]);
        let mut b = a;
        b.origin[0] += GEOMETRY_TOLERANCE / 2.0;
        assert!(a.approx_eq(&b));

        b.origin[0] += GEOMETRY_TOLERANCE * 10.0;
        assert!(!a.approx_eq(&b));

        let mut c = a;
        c.size = [2, 2, 3];
        assert!(!a.approx_eq(&c));
    }

    #[test]
    fn test_overlap_volume() {
        let a = Geometry::axis_aligned([0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [10, 10, 10]);
        let b = Geometry::axis_aligned([5.0, 5.0, 5.0], [1.0, 1.0, 1.0], [10, 10, 10]);
        let far = Geometry::axis_aligned([100.0, 0.0, 0.0], [1.0, 1.0, 1.0], [10, 10, 10]);

        assert!((a.overlap_volume(&a) - 1000.0).abs() < 1e-9);
        assert!((a.overlap_volume(&b) - 125.0).abs() < 1e-9);
        assert_eq!(a.overlap_volume(&far), 0.0);
    }

    #[test]
    fn test_invert_singular() {
        let singular = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]];
        assert!(invert(&singular).is_none());
        assert_eq!(invert(&IDENTITY), Some(IDENTITY));
    }

    #[test]
    fn test_is_valid() {
        assert!(Geometry::axis_aligned([0.0; 3], [1.0; 3], [1, 1, 1]).is_valid());
        assert!(!Geometry::axis_aligned([0.0; 3], [0.0, 1.0, 1.0], [1, 1, 1]).is_valid());
        assert!(!Geometry::axis_aligned([0.0; 3], [1.0; 3], [0, 1, 1]).is_valid());
    }
}
