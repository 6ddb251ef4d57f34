//! DICOM-SEG encoding of label volumes

mod dicom_seg;

pub use dicom_seg::DicomSegEncoder;

use crate::config::EncoderOptions;
use crate::error::Result;
use crate::metadata::{SegMetadataSpec, SegmentDescriptor};
use crate::series::ImageSeries;
use crate::types::LabelVolume;

/// Everything needed to encode one DICOM-SEG object
///
/// `volume` must already lie on the grid of `series`. `segments` lists the
/// descriptors to emit, one per label kept in the volume, in label order.
#[derive(Debug, Clone)]
pub struct SegEncodeRequest<'a> {
    pub volume: &'a LabelVolume,
    pub series: &'a ImageSeries,
    pub segments: Vec<&'a SegmentDescriptor>,
    pub metadata: &'a SegMetadataSpec,
    pub options: EncoderOptions,
}

/// Encodes a label volume into the bytes of a DICOM Part 10 file
pub trait SegEncoder: Send + Sync {
    fn encode_seg(&self, request: &SegEncodeRequest<'_>) -> Result<Vec<u8>>;
}
