use crate::error::{DicomSegError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default name of the per-patient images folder
pub const DEFAULT_IMAGES_FOLDER_NAME: &str = "images";

/// Default name of the per-patient segmentations folder
pub const DEFAULT_SEGMENTATIONS_FOLDER_NAME: &str = "segmentations";

/// Where recorded segmentation files go when a patients folder is destructured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentationsPlacement {
    /// Move segmentation files back into the pooled segmentations folder
    #[default]
    RestorePooled,
    /// Leave segmentation files in the flat patient folder
    LeaveInPatientFolder,
}

impl fmt::Display for SegmentationsPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationsPlacement::RestorePooled => write!(f, "restore-pooled"),
            SegmentationsPlacement::LeaveInPatientFolder => write!(f, "leave-in-patient-folder"),
        }
    }
}

/// Options forwarded to the DICOM-SEG encoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderOptions {
    /// Omit frames that hold no voxel of their segment
    pub skip_empty_slices: bool,

    /// Skip labels without a segment descriptor instead of failing
    pub skip_missing_segment: bool,
}

/// Configuration of the whole conversion pipeline
///
/// Every component receives this struct (or the part it needs) at
/// construction; there is no process-wide settings state.
///
/// # Example
///
/// ```
/// use dicomseg_core::PipelineConfig;
///
/// let config = PipelineConfig::default_data_root("data")
///     .with_patient_number_prefix("Patient")
///     .resample_segmentation_to_source_image_size(true);
///
/// assert_eq!(config.patient_images_folder_name, "images");
/// assert!(config.resample_segmentation_to_source_image_size);
/// assert!(config.segmentations_folder.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Folder containing one sub-folder per patient
    pub patients_folder: PathBuf,

    /// Pooled segmentations folder, for layouts that have one
    pub segmentations_folder: Option<PathBuf>,

    /// dcmqi-style metadata JSON describing the segments
    pub metadata_json: PathBuf,

    /// Name of the folder holding a patient's DICOM images
    pub patient_images_folder_name: String,

    /// Name of the folder holding a patient's segmentation files
    pub patient_segmentations_folder_name: String,

    /// Marker that precedes the patient identifier in file names
    pub patient_number_prefix: String,

    /// Resample segmentations onto the reference series grid when they differ
    pub resample_segmentation_to_source_image_size: bool,

    /// Delete source segmentation files once their SEG files are written
    pub delete_itk_segmentation_files: bool,

    /// Allow one segmentation to reference several image series
    pub enable_multi_images_association: bool,

    /// Destructure behaviour for recorded segmentation files
    pub segmentations_placement: SegmentationsPlacement,

    /// DICOM-SEG encoder options
    pub encoder: EncoderOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            patients_folder: PathBuf::from("Patients"),
            segmentations_folder: None,
            metadata_json: PathBuf::from("metadata.json"),
            patient_images_folder_name: DEFAULT_IMAGES_FOLDER_NAME.to_string(),
            patient_segmentations_folder_name: DEFAULT_SEGMENTATIONS_FOLDER_NAME.to_string(),
            patient_number_prefix: String::new(),
            resample_segmentation_to_source_image_size: false,
            delete_itk_segmentation_files: false,
            enable_multi_images_association: false,
            segmentations_placement: SegmentationsPlacement::default(),
            encoder: EncoderOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration for the conventional data folder layout
    ///
    /// `<root>/Patients`, `<root>/Segmentations` and `<root>/metadata.json`.
    pub fn default_data_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            patients_folder: root.join("Patients"),
            segmentations_folder: Some(root.join("Segmentations")),
            metadata_json: root.join("metadata.json"),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file
    ///
    /// Missing keys take their default value.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| DicomSegError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks folder names are usable as single path components
    pub fn validate(&self) -> Result<()> {
        for name in [
            &self.patient_images_folder_name,
            &self.patient_segmentations_folder_name,
        ] {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(DicomSegError::Config(format!(
                    "invalid patient sub-folder name '{}'",
                    name
                )));
            }
        }
        if self.patient_images_folder_name == self.patient_segmentations_folder_name {
            return Err(DicomSegError::Config(
                "images and segmentations folders must have different names".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder: Set the patients folder
    pub fn with_patients_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.patients_folder = path.into();
        self
    }

    /// Builder: Set the pooled segmentations folder
    pub fn with_segmentations_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.segmentations_folder = Some(path.into());
        self
    }

    /// Builder: Set the metadata JSON path
    pub fn with_metadata_json(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_json = path.into();
        self
    }

    /// Builder: Set the patient identifier marker
    pub fn with_patient_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.patient_number_prefix = prefix.into();
        self
    }

    /// Builder: Set per-patient folder names
    pub fn with_patient_folder_names(
        mut self,
        images: impl Into<String>,
        segmentations: impl Into<String>,
    ) -> Self {
        self.patient_images_folder_name = images.into();
        self.patient_segmentations_folder_name = segmentations.into();
        self
    }

    /// Builder: Resample segmentations onto the source image grid
    pub fn resample_segmentation_to_source_image_size(mut self, resample: bool) -> Self {
        self.resample_segmentation_to_source_image_size = resample;
        self
    }

    /// Builder: Delete source segmentation files after conversion
    pub fn delete_itk_segmentation_files(mut self, delete: bool) -> Self {
        self.delete_itk_segmentation_files = delete;
        self
    }

    /// Builder: Enable multi-image association
    pub fn enable_multi_images_association(mut self, enable: bool) -> Self {
        self.enable_multi_images_association = enable;
        self
    }

    /// Builder: Set the destructure placement
    pub fn with_segmentations_placement(mut self, placement: SegmentationsPlacement) -> Self {
        self.segmentations_placement = placement;
        self
    }

    /// Builder: Set encoder options
    pub fn with_encoder_options(mut self, encoder: EncoderOptions) -> Self {
        self.encoder = encoder;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_folder_names() {
        let config = PipelineConfig::default();
        assert_eq!(config.patient_images_folder_name, "images");
        assert_eq!(config.patient_segmentations_folder_name, "segmentations");
        assert!(config.patient_number_prefix.is_empty());
        assert!(!config.delete_itk_segmentation_files);
        assert_eq!(
            config.segmentations_placement,
            SegmentationsPlacement::RestorePooled
        );
        assert!(!config.encoder.skip_empty_slices);
        assert!(!config.encoder.skip_missing_segment);
    }

    #[test]
    fn test_empty_encoder_object_is_default() {
        let options: EncoderOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, EncoderOptions::default());
    }

    #[test]
    fn test_default_data_root() {
        let config = PipelineConfig::default_data_root("/data");
        assert_eq!(config.patients_folder, PathBuf::from("/data/Patients"));
        assert_eq!(
            config.segmentations_folder,
            Some(PathBuf::from("/data/Segmentations"))
        );
        assert_eq!(config.metadata_json, PathBuf::from("/data/metadata.json"));
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "patients_folder": "/data/Patients",
                "patient_number_prefix": "Patient",
                "enable_multi_images_association": true,
                "segmentations_placement": "leave-in-patient-folder",
                "encoder": {{ "skip_empty_slices": true }}
            }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.patients_folder, PathBuf::from("/data/Patients"));
        assert_eq!(config.patient_number_prefix, "Patient");
        assert!(config.enable_multi_images_association);
        assert!(config.encoder.skip_empty_slices);
        assert!(!config.encoder.skip_missing_segment);
        assert_eq!(
            config.segmentations_placement,
            SegmentationsPlacement::LeaveInPatientFolder
        );
        assert_eq!(config.patient_images_folder_name, "images");
    }

    #[test]
    fn test_validate_rejects_identical_folder_names() {
        let config = PipelineConfig::default().with_patient_folder_names("data", "data");
        assert!(config.validate().is_err());

        let config = PipelineConfig::default().with_patient_folder_names("a/b", "segs");
        assert!(config.validate().is_err());
    }
}
