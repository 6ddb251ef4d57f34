use crate::config::PipelineConfig;
use crate::fs_utils::{list_dirs, list_entries};
use crate::types::LayoutCategory;
use log::debug;
use std::path::{Path, PathBuf};

/// Decides which [`LayoutCategory`] a patients folder follows
///
/// The classifier only lists directories; it never modifies the tree.
#[derive(Debug, Clone)]
pub struct LayoutClassifier {
    images_folder_name: String,
    segmentations_folder_name: String,
    pooled_segmentations: Option<PathBuf>,
}

impl LayoutClassifier {
    /// Creates a classifier from the pipeline configuration
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            images_folder_name: config.patient_images_folder_name.clone(),
            segmentations_folder_name: config.patient_segmentations_folder_name.clone(),
            pooled_segmentations: config.segmentations_folder.clone(),
        }
    }

    /// Classifies the patients folder
    ///
    /// Predicates are tried in order and the first one that holds wins:
    ///
    /// 1. every patient folder holds the images and segmentations folders
    /// 2. pooled segmentations exist and every patient folder holds
    ///    study folders that hold series folders
    /// 3. pooled segmentations exist and every patient folder holds files only
    ///
    /// Anything else, including an empty or unreadable root, is
    /// [`LayoutCategory::Unrecognized`].
    pub fn classify(&self, patients_root: &Path) -> LayoutCategory {
        let patients = match list_dirs(patients_root) {
            Ok(patients) if !patients.is_empty() => patients,
            _ => {
                debug!("No patient folder found in {}", patients_root.display());
                return LayoutCategory::Unrecognized;
            }
        };

        if patients.iter().all(|p| self.is_canonical_patient(p)) {
            return LayoutCategory::PerPatientSegmentations;
        }

        let pooled = self
            .pooled_segmentations
            .as_deref()
            .is_some_and(|path| path.is_dir());
        if !pooled {
            debug!("No pooled segmentations folder for {}", patients_root.display());
            return LayoutCategory::Unrecognized;
        }

        if patients.iter().all(|p| is_hierarchical_patient(p)) {
            LayoutCategory::HierarchicalImagesPooledSegmentations
        } else if patients.iter().all(|p| is_flat_patient(p)) {
            LayoutCategory::FlatImagesPooledSegmentations
        } else {
            LayoutCategory::Unrecognized
        }
    }

    fn is_canonical_patient(&self, patient: &Path) -> bool {
        patient.join(&self.images_folder_name).is_dir()
            && patient.join(&self.segmentations_folder_name).is_dir()
    }
}

/// Patient folder holding files only
fn is_flat_patient(patient: &Path) -> bool {
    match list_entries(patient) {
        Ok(entries) => !entries.is_empty() && entries.iter().all(|e| e.is_file()),
        Err(_) => false,
    }
}

/// Patient folder holding study folders, each holding series folders
fn is_hierarchical_patient(patient: &Path) -> bool {
    let studies = match list_entries(patient) {
        Ok(entries) if !entries.is_empty() && entries.iter().all(|e| e.is_dir()) => entries,
        _ => return false,
    };
    studies.iter().all(|study| match list_entries(study) {
        Ok(series) => !series.is_empty() && series.iter().all(|s| s.is_dir()),
        Err(_) => false,
    })
}
