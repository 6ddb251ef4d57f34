//! Research-format segmentation decoders
//!
//! Every decoder produces a [`LabelVolume`] in DICOM patient coordinates
//! (LPS), so that it can be compared with the grid of a DICOM series.

mod nii;
mod nrrd;

pub use nii::NiftiDecoder;
pub use nrrd::NrrdDecoder;

use crate::error::{DicomSegError, Result};
use crate::types::LabelVolume;
use std::path::Path;

/// Extensions recognised as segmentation files, longest first
const SEGMENTATION_EXTENSIONS: [&str; 7] = [
    ".seg.nrrd", ".nii.gz", ".nrrd", ".nhdr", ".nii", ".mha", ".mhd",
];

/// Suffix of written DICOM-SEG files
pub const SEG_OUTPUT_SUFFIX: &str = ".SEG.dcm";

/// Decodes a segmentation file into a label volume
pub trait VolumeDecoder: Send + Sync {
    fn decode_volume(&self, path: &Path) -> Result<LabelVolume>;
}

/// Picks a decoder from the file extension
#[derive(Debug, Default, Clone)]
pub struct ResearchFormatDecoder {
    nifti: NiftiDecoder,
    nrrd: NrrdDecoder,
}

impl ResearchFormatDecoder {
    /// Creates a new ResearchFormatDecoder
    pub fn new() -> Self {
        Self::default()
    }
}

impl VolumeDecoder for ResearchFormatDecoder {
    fn decode_volume(&self, path: &Path) -> Result<LabelVolume> {
        let name = file_name_lowercase(path);
        if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            self.nifti.decode_volume(path)
        } else if name.ends_with(".nrrd") || name.ends_with(".nhdr") {
            self.nrrd.decode_volume(path)
        } else {
            Err(DicomSegError::decode(path, "unsupported segmentation format"))
        }
    }
}

/// File name without its segmentation extension(s)
///
/// `liver.nii.gz` and `liver.seg.nrrd` both give `liver`. Unknown extensions
/// are stripped like a regular extension.
pub fn segmentation_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lowercase = name.to_lowercase();
    for extension in SEGMENTATION_EXTENSIONS {
        if lowercase.ends_with(extension) {
            if let Some(stem) = name.get(..name.len().saturating_sub(extension.len())) {
                if !stem.is_empty() {
                    return stem.to_string();
                }
            }
        }
    }
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(name)
}

/// Whether a file is a previously written DICOM-SEG output
pub fn is_seg_output(path: &Path) -> bool {
    file_name_lowercase(path).ends_with(&SEG_OUTPUT_SUFFIX.to_lowercase())
}

fn file_name_lowercase(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Converts a decoded voxel value to a label
///
/// Labels must be non-negative integers that fit in 16 bits; float label maps
/// are accepted when every value is integral.
pub(crate) fn to_label(value: f64, path: &Path) -> Result<u16> {
    let rounded = value.round();
    if !value.is_finite() || (value - rounded).abs() > 1e-3 {
        return Err(DicomSegError::decode(
            path,
            format!("voxel value {} is not an integer label", value),
        ));
    }
    if rounded < 0.0 || rounded > u16::MAX as f64 {
        return Err(DicomSegError::decode(
            path,
            format!("voxel value {} is outside the label range", value),
        ));
    }
    Ok(rounded as u16)
}

/// Converts RAS coordinates (NIfTI, Slicer) to DICOM LPS
pub(crate) fn ras_to_lps(v: [f64; 3]) -> [f64; 3] {
    [-v[0], -v[1], v[2]]
}
