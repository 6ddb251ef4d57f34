use super::{ras_to_lps, to_label, VolumeDecoder};
use crate::error::{DicomSegError, Result};
use crate::types::{Geometry, LabelVolume, Matrix3, IDENTITY};
use log::debug;
use ndarray::Array3;
use nifti::{NiftiHeader, NiftiObject, RandomAccessNiftiVolume, ReaderOptions};
use std::path::Path;

/// Decodes NIfTI-1 label maps (`.nii`, `.nii.gz`)
///
/// The grid follows the ITK convention: sform when present, qform otherwise,
/// and `pixdim` alone as a last resort. Coordinates are converted from RAS to
/// LPS.
#[derive(Debug, Default, Clone)]
pub struct NiftiDecoder;

impl NiftiDecoder {
    /// Creates a new NiftiDecoder
    pub fn new() -> Self {
        Self
    }
}

impl VolumeDecoder for NiftiDecoder {
    fn decode_volume(&self, path: &Path) -> Result<LabelVolume> {
        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| DicomSegError::decode(path, e))?;
        let header = obj.header();
        let size = volume_size(header).map_err(|message| DicomSegError::decode(path, message))?;
        let geometry = header_geometry(header, size);
        debug!("{}: {}", path.display(), geometry);

        let volume = obj.volume();
        let [nx, ny, nz] = size;
        // Coordinates must cover every declared dimension, singleton ones included
        let mut coords = vec![0u16; header.dim[0] as usize];
        let mut labels = Vec::with_capacity(geometry.voxel_count());
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    for (axis, index) in [x, y, z].into_iter().enumerate().take(coords.len()) {
                        coords[axis] = index as u16;
                    }
                    let value = volume
                        .get_f64(&coords)
                        .map_err(|e| DicomSegError::decode(path, e))?;
                    labels.push(to_label(value, path)?);
                }
            }
        }

        let data = Array3::from_shape_vec((nz, ny, nx), labels)
            .map_err(|e| DicomSegError::decode(path, e))?;
        LabelVolume::new(data, geometry).map_err(|message| DicomSegError::decode(path, message))
    }
}

/// Spatial size `(x, y, z)`; extra dimensions must be singleton
fn volume_size(header: &NiftiHeader) -> std::result::Result<[usize; 3], String> {
    let ndim = header.dim[0] as usize;
    if !(1..=7).contains(&ndim) {
        return Err(format!("invalid dimension count {}", ndim));
    }
    if header.dim[4..=ndim.max(3)].iter().any(|&d| d > 1) {
        return Err(format!(
            "only 3D label maps are supported, got dimensions {:?}",
            &header.dim[1..=ndim]
        ));
    }
    let extent = |axis: usize| {
        if axis <= ndim {
            (header.dim[axis] as usize).max(1)
        } else {
            1
        }
    };
    Ok([extent(1), extent(2), extent(3)])
}

fn positive_spacing(value: f32) -> f64 {
    let value = (value as f64).abs();
    if value > 0.0 && value.is_finite() {
        value
    } else {
        1.0
    }
}

/// Builds the LPS grid of a NIfTI header
fn header_geometry(header: &NiftiHeader, size: [usize; 3]) -> Geometry {
    let pixdim = [
        positive_spacing(header.pixdim[1]),
        positive_spacing(header.pixdim[2]),
        positive_spacing(header.pixdim[3]),
    ];

    let (origin, spacing, direction) = if header.sform_code > 0 {
        sform_grid(header)
    } else if header.qform_code > 0 {
        qform_grid(header, pixdim)
    } else {
        ([0.0; 3], pixdim, IDENTITY)
    };

    // Flip the first two physical axes: RAS -> LPS
    let mut lps_direction = direction;
    for row in lps_direction.iter_mut().take(2) {
        for value in row.iter_mut() {
            *value = -*value;
        }
    }
    Geometry::new(ras_to_lps(origin), spacing, lps_direction, size)
}

fn sform_grid(header: &NiftiHeader) -> ([f64; 3], [f64; 3], Matrix3) {
    let rows = [header.srow_x, header.srow_y, header.srow_z];
    let mut spacing = [1.0; 3];
    let mut direction = IDENTITY;
    for axis in 0..3 {
        let column = [
            rows[0][axis] as f64,
            rows[1][axis] as f64,
            rows[2][axis] as f64,
        ];
        let norm = column.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            spacing[axis] = norm;
            for (row, value) in direction.iter_mut().zip(column) {
                row[axis] = value / norm;
            }
        }
    }
    let origin = [rows[0][3] as f64, rows[1][3] as f64, rows[2][3] as f64];
    (origin, spacing, direction)
}

fn qform_grid(header: &NiftiHeader, pixdim: [f64; 3]) -> ([f64; 3], [f64; 3], Matrix3) {
    let b = header.quatern_b as f64;
    let c = header.quatern_c as f64;
    let d = header.quatern_d as f64;
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };

    let mut direction = [
        [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
        [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
        [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
    ];
    for row in direction.iter_mut() {
        row[2] *= qfac;
    }
    let origin = [
        header.quatern_x as f64,
        header.quatern_y as f64,
        header.quatern_z as f64,
    ];
    (origin, pixdim, direction)
}
