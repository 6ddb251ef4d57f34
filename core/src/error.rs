use std::path::PathBuf;
use thiserror::Error;

/// Result type for dicomseg operations
pub type Result<T> = std::result::Result<T, DicomSegError>;

/// Error types for dicomseg operations
#[derive(Error, Debug)]
pub enum DicomSegError {
    /// The patients folder matches none of the known layouts
    #[error("Unrecognized folder layout: {}", .0.display())]
    UnrecognizedLayout(PathBuf),

    /// No patient identifier could be extracted from a file name
    #[error("No patient identifier after marker '{prefix}' in '{filename}'")]
    IdentifierNotFound { filename: String, prefix: String },

    /// A segmentation identifier matches several patient folders
    #[error("Identifier '{identifier}' of '{filename}' matches several patients: {candidates:?}")]
    AmbiguousMatch {
        filename: String,
        identifier: String,
        candidates: Vec<String>,
    },

    /// A segmentation identifier matches no patient folder
    #[error("Identifier '{identifier}' of '{filename}' matches no patient folder")]
    UnmatchedSegmentation { filename: String, identifier: String },

    /// Several image series are equally good references for a segmentation
    #[error("Cannot choose a reference series for {}: candidates {candidates:?}", .segmentation.display())]
    AmbiguousSeriesAssociation {
        segmentation: PathBuf,
        candidates: Vec<String>,
    },

    /// The segmentation grid and the reference grid do not overlap
    #[error("Incompatible geometry: {0}")]
    IncompatibleGeometry(String),

    /// Grids differ and resampling is disabled
    #[error("Geometry of {} differs from series {series} and resampling is disabled", .segmentation.display())]
    GeometryMismatch {
        segmentation: PathBuf,
        series: String,
    },

    /// A label value has no descriptor in the metadata file
    #[error("Label {label} of {} has no segment descriptor", .segmentation.display())]
    UnknownSegmentLabel { label: u16, segmentation: PathBuf },

    /// A segmentation volume holds background only
    #[error("Segmentation {} contains no labelled voxel", .0.display())]
    EmptySegmentation(PathBuf),

    /// Another segmentation of the same run already produced this output
    #[error("Output {} of {} is already written by another segmentation", .output.display(), .segmentation.display())]
    OutputCollision {
        segmentation: PathBuf,
        output: PathBuf,
    },

    /// No DICOM image series was found for a patient
    #[error("No DICOM series found in {}", .0.display())]
    NoReferenceSeries(PathBuf),

    /// A patient images folder mixes several patients
    #[error("Folder {} mixes several patients: {patient_ids:?}", .path.display())]
    InconsistentPatient {
        path: PathBuf,
        patient_ids: Vec<String>,
    },

    /// Research-format decoding error
    #[error("Cannot decode {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },

    /// DICOM-SEG encoding error
    #[error("Encoder error: {0}")]
    Encode(String),

    /// DICOM reading/writing error
    #[error("DICOM error: {0}")]
    DicomError(String),

    /// Metadata or manifest JSON error
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DicomSegError {
    /// Whether the error must stop a whole batch
    ///
    /// Only layout classification failures are fatal: every other error is
    /// scoped to one file or one patient.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DicomSegError::UnrecognizedLayout(_))
    }

    /// Helper to build a decoding error
    pub fn decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        DicomSegError::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

// Helper conversions
impl From<String> for DicomSegError {
    fn from(s: String) -> Self {
        DicomSegError::Config(s)
    }
}

impl From<&str> for DicomSegError {
    fn from(s: &str) -> Self {
        DicomSegError::Config(s.to_string())
    }
}

impl From<serde_json::Error> for DicomSegError {
    fn from(e: serde_json::Error) -> Self {
        DicomSegError::Metadata(format!("{}", e))
    }
}

// Convert dicom-object errors
impl From<dicom_object::ReadError> for DicomSegError {
    fn from(e: dicom_object::ReadError) -> Self {
        DicomSegError::DicomError(format!("{}", e))
    }
}

impl From<dicom_object::WriteError> for DicomSegError {
    fn from(e: dicom_object::WriteError) -> Self {
        DicomSegError::DicomError(format!("{}", e))
    }
}

impl From<dicom_object::WithMetaError> for DicomSegError {
    fn from(e: dicom_object::WithMetaError) -> Self {
        DicomSegError::Encode(format!("{}", e))
    }
}

impl From<dicom_core::value::ConvertValueError> for DicomSegError {
    fn from(e: dicom_core::value::ConvertValueError) -> Self {
        DicomSegError::DicomError(format!("{}", e))
    }
}
