pub mod assembler;
pub mod batch;
pub mod cli;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod fs_utils;
pub mod identifier;
pub mod layout;
pub mod metadata;
pub mod resample;
pub mod series;
pub mod tags;
pub mod types;

pub use assembler::{DicomSegAssembler, SegmentationFailure, WriteOptions, WriteReport};
pub use batch::{convert_patients, BatchReport, PatientOutcome, Pipeline};
pub use config::{EncoderOptions, PipelineConfig, SegmentationsPlacement};
pub use decode::{NiftiDecoder, NrrdDecoder, ResearchFormatDecoder, VolumeDecoder};
pub use encode::{DicomSegEncoder, SegEncodeRequest, SegEncoder};
pub use error::{DicomSegError, Result};
pub use identifier::IdentifierMatcher;
pub use layout::{FolderStructurer, LayoutClassifier, StructureReport};
pub use metadata::{CodedConcept, SegMetadataSpec, SegmentDescriptor};
pub use resample::SegmentationResampler;
pub use series::{DicomSeriesResolver, ImageSeries, SeriesResolver};
pub use types::*;
