use crate::error::{DicomSegError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Arrangement of a raw patients folder
///
/// ```text
/// PerPatientSegmentations        FlatImagesPooledSegmentations    HierarchicalImagesPooledSegmentations
/// Patients/                      Patients/                        Patients/
///   patient1/                      patient1/                        patient1/
///     images/IM0.dcm ...             IM0.dcm ...                      study0/series0/CT0.dcm ...
///     segmentations/CT.nrrd ...    Segmentations/                   Segmentations/
///                                    Patient1_CT.nrrd ...             Patient1_CT.nrrd ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutCategory {
    /// Canonical layout: `images/` and `segmentations/` in every patient folder
    PerPatientSegmentations,
    /// DICOM files directly in patient folders, segmentations pooled
    FlatImagesPooledSegmentations,
    /// Patient/study/series folders, segmentations pooled
    HierarchicalImagesPooledSegmentations,
    /// None of the known layouts
    Unrecognized,
}

impl LayoutCategory {
    /// Whether this layout keeps segmentations in one shared folder
    pub fn is_pooled(&self) -> bool {
        matches!(
            self,
            LayoutCategory::FlatImagesPooledSegmentations
                | LayoutCategory::HierarchicalImagesPooledSegmentations
        )
    }

    /// Whether this is the canonical layout
    pub fn is_canonical(&self) -> bool {
        matches!(self, LayoutCategory::PerPatientSegmentations)
    }

    /// Turns `Unrecognized` into the fatal [`DicomSegError::UnrecognizedLayout`]
    pub fn require_recognized(self, root: &Path) -> Result<Self> {
        match self {
            LayoutCategory::Unrecognized => {
                Err(DicomSegError::UnrecognizedLayout(root.to_path_buf()))
            }
            category => Ok(category),
        }
    }

    /// Returns simple name for display
    pub fn simple_name(&self) -> &'static str {
        match self {
            LayoutCategory::PerPatientSegmentations => "per-patient-segmentations",
            LayoutCategory::FlatImagesPooledSegmentations => "flat-images-pooled-segmentations",
            LayoutCategory::HierarchicalImagesPooledSegmentations => {
                "hierarchical-images-pooled-segmentations"
            }
            LayoutCategory::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for LayoutCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simple_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_recognized() {
        let root = Path::new("/data/Patients");
        assert!(matches!(
            LayoutCategory::Unrecognized.require_recognized(root),
            Err(DicomSegError::UnrecognizedLayout(_))
        ));
        assert_eq!(
            LayoutCategory::FlatImagesPooledSegmentations
                .require_recognized(root)
                .unwrap(),
            LayoutCategory::FlatImagesPooledSegmentations
        );
    }

    #[test]
    fn test_pooled_categories() {
        assert!(LayoutCategory::FlatImagesPooledSegmentations.is_pooled());
        assert!(LayoutCategory::HierarchicalImagesPooledSegmentations.is_pooled());
        assert!(!LayoutCategory::PerPatientSegmentations.is_pooled());
        assert!(!LayoutCategory::Unrecognized.is_pooled());
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&LayoutCategory::HierarchicalImagesPooledSegmentations)
            .unwrap();
        assert_eq!(json, "\"hierarchical-images-pooled-segmentations\"");
        assert_eq!(
            LayoutCategory::HierarchicalImagesPooledSegmentations.to_string(),
            "hierarchical-images-pooled-segmentations"
        );
    }
}
