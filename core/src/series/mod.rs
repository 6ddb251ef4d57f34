//! Reference DICOM image series of a patient

mod dicom;

pub use dicom::DicomSeriesResolver;

use crate::error::Result;
use crate::types::Geometry;
use std::fmt;
use std::path::{Path, PathBuf};

/// One DICOM instance of an image series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesInstance {
    pub path: PathBuf,
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
}

/// A DICOM image series with its sampling grid
///
/// `instances` are ordered along the slice normal, so instance `k` is slice
/// `z = k` of `geometry`.
#[derive(Debug, Clone)]
pub struct ImageSeries {
    pub series_instance_uid: String,
    pub study_instance_uid: Option<String>,
    pub frame_of_reference_uid: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub patient_birth_date: Option<String>,
    pub patient_sex: Option<String>,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub study_id: Option<String>,
    pub accession_number: Option<String>,
    pub referring_physician_name: Option<String>,
    pub modality: Option<String>,
    pub series_description: Option<String>,
    pub instances: Vec<SeriesInstance>,
    pub geometry: Geometry,
}

impl ImageSeries {
    /// Creates a series without instances or patient attributes
    pub fn new(series_instance_uid: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            series_instance_uid: series_instance_uid.into(),
            study_instance_uid: None,
            frame_of_reference_uid: None,
            patient_id: None,
            patient_name: None,
            patient_birth_date: None,
            patient_sex: None,
            study_date: None,
            study_time: None,
            study_id: None,
            accession_number: None,
            referring_physician_name: None,
            modality: None,
            series_description: None,
            instances: Vec::new(),
            geometry,
        }
    }

    /// Builder: Set the series description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.series_description = Some(description.into());
        self
    }

    /// Whether a file name refers to this series
    ///
    /// True when the file name contains the Series Instance UID, or the
    /// (non-empty) Series Description ignoring case.
    pub fn is_named_in(&self, filename: &str) -> bool {
        if filename.contains(&self.series_instance_uid) {
            return true;
        }
        match &self.series_description {
            Some(description) if !description.trim().is_empty() => filename
                .to_lowercase()
                .contains(&description.trim().to_lowercase()),
            _ => false,
        }
    }
}

impl fmt::Display for ImageSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.series_description {
            Some(description) if !description.is_empty() => {
                write!(f, "{} ({})", self.series_instance_uid, description)
            }
            _ => write!(f, "{}", self.series_instance_uid),
        }
    }
}

/// Lists the image series stored below a patient images folder
pub trait SeriesResolver: Send + Sync {
    fn resolve_series(&self, images_path: &Path) -> Result<Vec<ImageSeries>>;
}
