use crate::error::{DicomSegError, Result};
use crate::types::{mat_vec, Geometry, LabelVolume};
use log::debug;
use ndarray::{Array3, Axis};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Nearest-neighbour resampling of label volumes onto another grid
///
/// Labels are never interpolated: every target voxel takes the label of the
/// source voxel whose centre is closest, or background when it falls outside
/// the source grid.
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentationResampler;

impl SegmentationResampler {
    /// Creates a new SegmentationResampler
    pub fn new() -> Self {
        Self
    }

    /// Resamples `volume` onto `target`
    ///
    /// A volume already on `target` (within tolerance) is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DicomSegError::IncompatibleGeometry`] when either grid is
    /// degenerate, when the grids do not overlap physically, or when no target
    /// voxel maps inside the source grid.
    pub fn resample(&self, volume: LabelVolume, target: &Geometry) -> Result<LabelVolume> {
        let source = volume.geometry;
        if source.approx_eq(target) {
            return Ok(volume);
        }
        if !source.is_valid() || !target.is_valid() {
            return Err(DicomSegError::IncompatibleGeometry(format!(
                "degenerate grid: source {}, target {}",
                source, target
            )));
        }
        if source.overlap_volume(target) <= 0.0 {
            return Err(DicomSegError::IncompatibleGeometry(format!(
                "segmentation grid {} does not overlap image grid {}",
                source, target
            )));
        }
        let to_source_index = source.physical_to_index_matrix().ok_or_else(|| {
            DicomSegError::IncompatibleGeometry(format!("singular direction matrix in {}", source))
        })?;

        // Source index = offset + steps[0] * i + steps[1] * j + steps[2] * k
        let offset = mat_vec(
            &to_source_index,
            [
                target.origin[0] - source.origin[0],
                target.origin[1] - source.origin[1],
                target.origin[2] - source.origin[2],
            ],
        );
        let steps: [[f64; 3]; 3] = std::array::from_fn(|axis| {
            let column = [
                target.direction[0][axis] * target.spacing[axis],
                target.direction[1][axis] * target.spacing[axis],
                target.direction[2][axis] * target.spacing[axis],
            ];
            mat_vec(&to_source_index, column)
        });

        let [width, height, depth] = target.size;
        let source_size = source.size;
        let mut data = Array3::<u16>::zeros((depth, height, width));
        let inside = AtomicUsize::new(0);

        data.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(k, mut slice)| {
                let mut local = 0;
                for j in 0..height {
                    for i in 0..width {
                        let index: [f64; 3] = std::array::from_fn(|axis| {
                            offset[axis]
                                + steps[0][axis] * i as f64
                                + steps[1][axis] * j as f64
                                + steps[2][axis] * k as f64
                        });
                        let Some([x, y, z]) = nearest_voxel(index, source_size) else {
                            continue;
                        };
                        local += 1;
                        slice[(j, i)] = volume.data[(z, y, x)];
                    }
                }
                inside.fetch_add(local, Ordering::Relaxed);
            });

        let inside = inside.into_inner();
        if inside == 0 {
            return Err(DicomSegError::IncompatibleGeometry(format!(
                "no voxel of image grid {} falls inside segmentation grid {}",
                target, source
            )));
        }
        debug!(
            "Resampled {} -> {} ({} of {} voxels inside the source)",
            source,
            target,
            inside,
            target.voxel_count()
        );

        LabelVolume::new(data, *target).map_err(DicomSegError::IncompatibleGeometry)
    }
}

/// Rounds a continuous index to the closest voxel, `None` outside the grid
fn nearest_voxel(index: [f64; 3], size: [usize; 3]) -> Option<[usize; 3]> {
    let mut voxel = [0usize; 3];
    for axis in 0..3 {
        let rounded = index[axis].round();
        if !(0.0..size[axis] as f64).contains(&rounded) {
            return None;
        }
        voxel[axis] = rounded as usize;
    }
    Some(voxel)
}
