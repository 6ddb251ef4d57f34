use super::manifest::{MoveKind, RecordedMove, StructureManifest};
use crate::config::{PipelineConfig, SegmentationsPlacement};
use crate::error::{DicomSegError, Result};
use crate::fs_utils::{
    list_dirs, list_entries, list_files, list_files_recursive, move_path, remove_dir_if_empty,
};
use crate::identifier::{IdentifierMatcher, PrefixMatcher};
use crate::types::{LayoutCategory, PatientRecord};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// A file (or patient folder) that could not be processed
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: DicomSegError,
}

/// Outcome of a `structure` or `destructure` run
#[derive(Debug)]
pub struct StructureReport {
    /// Layout the run acted upon
    pub category: LayoutCategory,

    /// Number of patient folders visited
    pub patients: usize,

    /// Number of files or folders moved
    pub moved: usize,

    /// Per-file failures; the files stayed where they were
    pub failures: Vec<FileFailure>,
}

impl StructureReport {
    fn new(category: LayoutCategory) -> Self {
        Self {
            category,
            patients: 0,
            moved: 0,
            failures: Vec::new(),
        }
    }

    /// Whether every file was processed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Moves patient folders between a raw layout and the canonical layout
///
/// The canonical layout has one folder per patient, holding an images
/// folder with the DICOM files and a segmentations folder with the
/// research-format segmentation files.
pub struct FolderStructurer {
    images_folder_name: String,
    segmentations_folder_name: String,
    placement: SegmentationsPlacement,
    matcher: Box<dyn IdentifierMatcher>,
}

impl FolderStructurer {
    /// Creates a structurer using marker-based identifier matching
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            images_folder_name: config.patient_images_folder_name.clone(),
            segmentations_folder_name: config.patient_segmentations_folder_name.clone(),
            placement: config.segmentations_placement,
            matcher: Box::new(PrefixMatcher::new(config.patient_number_prefix.clone())),
        }
    }

    /// Identifier matching strategy shared with the conversion step
    pub fn matcher(&self) -> &dyn IdentifierMatcher {
        self.matcher.as_ref()
    }

    /// Builder: Replace the identifier matching strategy
    pub fn with_matcher(mut self, matcher: Box<dyn IdentifierMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Rearranges the patients folder into the canonical layout
    ///
    /// Segmentation files that cannot be matched to exactly one patient are
    /// reported in [`StructureReport::failures`] and left in the pooled
    /// folder. Every move is recorded in the structure manifest so that
    /// [`FolderStructurer::destructure`] can revert it. Running it again on an
    /// already structured tree moves nothing.
    ///
    /// # Errors
    ///
    /// Fails for [`LayoutCategory::Unrecognized`], for a pooled category
    /// without a segmentations folder, and when the patients folder cannot be
    /// listed or the manifest cannot be written.
    pub fn structure(
        &self,
        patients_root: &Path,
        category: LayoutCategory,
        segmentations_root: Option<&Path>,
    ) -> Result<StructureReport> {
        let category = category.require_recognized(patients_root)?;
        let mut report = StructureReport::new(category);
        let patients = PatientRecord::scan(patients_root, self.matcher.as_ref())?;
        report.patients = patients.len();

        if category.is_canonical() {
            info!(
                "{} already follows the canonical layout",
                patients_root.display()
            );
            if StructureManifest::load(patients_root)?.is_none() {
                StructureManifest::new(category, None).save(patients_root)?;
            }
            return Ok(report);
        }

        let segmentations_root = segmentations_root.ok_or_else(|| {
            DicomSegError::Config(format!(
                "layout {} requires a pooled segmentations folder",
                category
            ))
        })?;

        // Match every pooled file before moving anything
        let mut assignments: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
        for segmentation in list_files(segmentations_root)? {
            let filename = file_name(&segmentation);
            match self.locate(&filename, &patients) {
                Ok(index) => {
                    debug!(
                        "{} belongs to patient {}",
                        filename, patients[index].identifier
                    );
                    assignments.entry(index).or_default().push(segmentation);
                }
                Err(e) => {
                    warn!("Leaving {} in place: {}", segmentation.display(), e);
                    report.failures.push(FileFailure {
                        path: segmentation,
                        error: e,
                    });
                }
            }
        }

        let mut manifest = StructureManifest::load_or_new(
            patients_root,
            category,
            Some(segmentations_root.to_path_buf()),
        )?;

        for (index, patient) in patients.iter().enumerate() {
            let segmentations = assignments.remove(&index).unwrap_or_default();
            let result = self.structure_patient(
                patients_root,
                patient,
                category,
                &segmentations,
                segmentations_root,
                &mut manifest,
            );
            match result {
                Ok(moved) => report.moved += moved,
                Err(e) => {
                    error!("Failed to structure {}: {}", patient.path.display(), e);
                    report.failures.push(FileFailure {
                        path: patient.path.clone(),
                        error: e,
                    });
                }
            }
        }

        manifest.save(patients_root)?;
        info!(
            "Structured {} patients ({} moves, {} failures)",
            report.patients,
            report.moved,
            report.failures.len()
        );
        Ok(report)
    }

    /// Reverts [`FolderStructurer::structure`]
    ///
    /// Files recorded in the manifest go back to their original location;
    /// recorded segmentation files follow the configured
    /// [`SegmentationsPlacement`]. Files the manifest does not know, such as
    /// written DICOM-SEG files, land in the flat patient folder. Without a
    /// manifest the images and segmentations folders are simply flattened
    /// into their patient folder.
    pub fn destructure(&self, patients_root: &Path) -> Result<StructureReport> {
        let manifest = StructureManifest::load(patients_root)?;

        let category = manifest
            .as_ref()
            .map(|m| m.category)
            .unwrap_or(LayoutCategory::PerPatientSegmentations);
        let mut report = StructureReport::new(category);

        if let Some(manifest) = &manifest {
            if manifest.category.is_canonical() {
                // Nothing was moved by `structure`
                StructureManifest::remove(patients_root)?;
                return Ok(report);
            }
        }

        let recorded = manifest
            .as_ref()
            .map(|m| m.by_structured_path())
            .unwrap_or_default();
        let pooled_folder = manifest
            .as_ref()
            .and_then(|m| m.segmentations_folder.clone());

        for patient in list_dirs(patients_root)? {
            report.patients += 1;
            let result = self.destructure_patient(
                patients_root,
                &patient,
                &recorded,
                pooled_folder.as_deref(),
                &mut report,
            );
            if let Err(e) = result {
                error!("Failed to destructure {}: {}", patient.display(), e);
                report.failures.push(FileFailure {
                    path: patient,
                    error: e,
                });
            }
        }

        if manifest.is_some() && report.is_success() {
            StructureManifest::remove(patients_root)?;
        }
        info!(
            "Destructured {} patients ({} moves, {} failures)",
            report.patients,
            report.moved,
            report.failures.len()
        );
        Ok(report)
    }

    /// Moves one patient's files out of the canonical sub-folders
    ///
    /// Failed moves are recorded in `report`; an error is returned only when
    /// a sub-folder cannot be listed or removed.
    fn destructure_patient(
        &self,
        patients_root: &Path,
        patient: &Path,
        recorded: &HashMap<&Path, &RecordedMove>,
        pooled_folder: Option<&Path>,
        report: &mut StructureReport,
    ) -> Result<()> {
        for sub_folder in [&self.images_folder_name, &self.segmentations_folder_name] {
            let folder = patient.join(sub_folder);
            if !folder.is_dir() {
                continue;
            }
            for entry in list_entries(&folder)? {
                let relative = entry.strip_prefix(patients_root).unwrap_or(&entry);
                let target = match recorded.get(relative) {
                    Some(mv) => match (mv.kind, self.placement, pooled_folder) {
                        (MoveKind::Image, _, _) => patients_root.join(&mv.original),
                        (
                            MoveKind::Segmentation,
                            SegmentationsPlacement::RestorePooled,
                            Some(pooled),
                        ) => pooled.join(&mv.original),
                        (MoveKind::Segmentation, _, _) => patient.join(file_name(&entry)),
                    },
                    None => unique_destination(patient, &file_name(&entry)),
                };

                match move_path(&entry, &target) {
                    Ok(()) => {
                        debug!("{} -> {}", entry.display(), target.display());
                        report.moved += 1;
                    }
                    Err(e) => {
                        warn!("Cannot restore {}: {}", entry.display(), e);
                        report.failures.push(FileFailure {
                            path: entry.clone(),
                            error: e.into(),
                        });
                    }
                }
            }
            remove_dir_if_empty(&folder)?;
        }
        Ok(())
    }

    /// Finds the single patient a segmentation file name belongs to
    fn locate(&self, filename: &str, patients: &[PatientRecord]) -> Result<usize> {
        let identifier = self.matcher.match_filename(filename)?;
        let candidates: Vec<usize> = patients
            .iter()
            .enumerate()
            .filter(|(_, p)| p.identifier == identifier)
            .map(|(index, _)| index)
            .collect();

        match candidates.as_slice() {
            [] => Err(DicomSegError::UnmatchedSegmentation {
                filename: filename.to_string(),
                identifier,
            }),
            [index] => Ok(*index),
            _ => Err(DicomSegError::AmbiguousMatch {
                filename: filename.to_string(),
                identifier,
                candidates: candidates
                    .iter()
                    .map(|&i| patients[i].folder_name().to_string())
                    .collect(),
            }),
        }
    }

    /// Moves one patient's files into the canonical layout
    fn structure_patient(
        &self,
        patients_root: &Path,
        patient: &PatientRecord,
        category: LayoutCategory,
        segmentations: &[PathBuf],
        segmentations_root: &Path,
        manifest: &mut StructureManifest,
    ) -> Result<usize> {
        let images = patient.path.join(&self.images_folder_name);
        let segmentations_folder = patient.path.join(&self.segmentations_folder_name);
        fs::create_dir_all(&images)?;
        fs::create_dir_all(&segmentations_folder)?;

        let relative = |path: &Path| {
            path.strip_prefix(patients_root)
                .unwrap_or(path)
                .to_path_buf()
        };
        let mut moved = 0;

        let entries: Vec<PathBuf> = list_entries(&patient.path)?
            .into_iter()
            .filter(|entry| *entry != images && *entry != segmentations_folder)
            .collect();

        for entry in entries {
            let files = match category {
                LayoutCategory::HierarchicalImagesPooledSegmentations if entry.is_dir() => {
                    list_files_recursive(&entry)?
                }
                _ => vec![entry.clone()],
            };
            for file in files {
                let target = unique_destination(&images, &file_name(&file));
                move_path(&file, &target)?;
                manifest.record(MoveKind::Image, relative(&file), relative(&target));
                moved += 1;
            }
            if entry.is_dir() {
                remove_empty_tree(&entry)?;
            }
        }

        for segmentation in segmentations {
            let target = segmentations_folder.join(file_name(segmentation));
            move_path(segmentation, &target)?;
            let original = segmentation
                .strip_prefix(segmentations_root)
                .unwrap_or(segmentation)
                .to_path_buf();
            manifest.record(MoveKind::Segmentation, original, relative(&target));
            moved += 1;
        }

        debug!("Structured {} ({} moves)", patient.path.display(), moved);
        Ok(moved)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Returns `dir/name`, or `dir/<n>_name` when that name is taken
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{}_{}", n, name)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Removes a directory tree bottom-up, keeping any folder that is not empty
fn remove_empty_tree(dir: &Path) -> Result<()> {
    for sub_dir in list_dirs(dir)? {
        remove_empty_tree(&sub_dir)?;
    }
    remove_dir_if_empty(dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutClassifier;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Every visible file below `root`, relative path -> content
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, String> {
        list_files_recursive(root)
            .unwrap()
            .into_iter()
            .map(|path| {
                let content = fs::read_to_string(&path).unwrap();
                (path.strip_prefix(root).unwrap().to_path_buf(), content)
            })
            .collect()
    }

    fn flat_dataset() -> (TempDir, PipelineConfig) {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig::default_data_root(temp_dir.path())
            .with_patient_number_prefix("Patient");
        let patients = &config.patients_folder;
        let pooled = config.segmentations_folder.clone().unwrap();

        touch(&patients.join("Patient1").join("IM0.dcm"), "p1-im0");
        touch(&patients.join("Patient1").join("IM1.dcm"), "p1-im1");
        touch(&patients.join("Patient2").join("IM0.dcm"), "p2-im0");
        touch(&pooled.join("Patient1_CT.nrrd"), "p1-ct");
        touch(&pooled.join("Patient1_PET.nrrd"), "p1-pet");
        touch(&pooled.join("Patient2_CT.nrrd"), "p2-ct");
        touch(&pooled.join("PatientX_CT.nrrd"), "unmatched");

        (temp_dir, config)
    }

    #[test]
    fn test_structure_flat_layout() {
        let (_temp_dir, config) = flat_dataset();
        let structurer = FolderStructurer::new(&config);
        let patients = &config.patients_folder;

        let report = structurer
            .structure(
                patients,
                LayoutCategory::FlatImagesPooledSegmentations,
                config.segmentations_folder.as_deref(),
            )
            .unwrap();

        assert_eq!(report.patients, 2);
        assert_eq!(report.moved, 6);
        assert!(patients.join("Patient1/images/IM0.dcm").is_file());
        assert!(patients.join("Patient1/images/IM1.dcm").is_file());
        assert!(patients.join("Patient1/segmentations/Patient1_CT.nrrd").is_file());
        assert!(patients.join("Patient1/segmentations/Patient1_PET.nrrd").is_file());
        assert!(patients.join("Patient2/segmentations/Patient2_CT.nrrd").is_file());
        assert_eq!(
            LayoutClassifier::new(&config).classify(patients),
            LayoutCategory::PerPatientSegmentations
        );
    }

    #[test]
    fn test_structure_reports_unmatched_and_keeps_going() {
        let (_temp_dir, config) = flat_dataset();
        let structurer = FolderStructurer::new(&config);
        let pooled = config.segmentations_folder.clone().unwrap();

        let report = structurer
            .structure(
                &config.patients_folder,
                LayoutCategory::FlatImagesPooledSegmentations,
                Some(&pooled),
            )
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.path, pooled.join("PatientX_CT.nrrd"));
        assert!(matches!(
            &failure.error,
            DicomSegError::UnmatchedSegmentation { identifier, .. } if identifier == "X"
        ));
        assert!(pooled.join("PatientX_CT.nrrd").is_file());
        assert!(config
            .patients_folder
            .join("Patient2/segmentations/Patient2_CT.nrrd")
            .is_file());
    }

    #[test]
    fn test_structure_ambiguous_match_leaves_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig::default_data_root(temp_dir.path())
            .with_patient_number_prefix("patient_");
        let patients = &config.patients_folder;
        let pooled = config.segmentations_folder.clone().unwrap();
        touch(&patients.join("patient_042").join("IM0.dcm"), "a");
        touch(&patients.join("patient_042-rescan").join("IM0.dcm"), "b");
        touch(&patients.join("patient_0042").join("IM0.dcm"), "c");
        touch(&pooled.join("patient_042_CT.nrrd"), "seg");
        touch(&pooled.join("patient_0042_CT.nrrd"), "seg2");

        let report = FolderStructurer::new(&config)
            .structure(
                patients,
                LayoutCategory::FlatImagesPooledSegmentations,
                Some(&pooled),
            )
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0].error,
            DicomSegError::AmbiguousMatch { candidates, .. } if candidates.len() == 2
        ));
        assert!(pooled.join("patient_042_CT.nrrd").is_file());
        // "0042" is a different identifier than "042"
        assert!(patients
            .join("patient_0042/segmentations/patient_0042_CT.nrrd")
            .is_file());
    }

    #[test]
    fn test_structure_twice_moves_nothing() {
        let (_temp_dir, config) = flat_dataset();
        let structurer = FolderStructurer::new(&config);
        let category = LayoutCategory::FlatImagesPooledSegmentations;
        let pooled = config.segmentations_folder.as_deref();

        structurer
            .structure(&config.patients_folder, category, pooled)
            .unwrap();
        let before = snapshot(config.patients_folder.parent().unwrap());

        let second = structurer
            .structure(&config.patients_folder, category, pooled)
            .unwrap();
        assert_eq!(second.moved, 0);
        assert_eq!(snapshot(config.patients_folder.parent().unwrap()), before);

        let canonical = structurer
            .structure(
                &config.patients_folder,
                LayoutCategory::PerPatientSegmentations,
                pooled,
            )
            .unwrap();
        assert_eq!(canonical.moved, 0);
    }

    #[test]
    fn test_structure_unrecognized_is_fatal() {
        let (_temp_dir, config) = flat_dataset();
        let result = FolderStructurer::new(&config).structure(
            &config.patients_folder,
            LayoutCategory::Unrecognized,
            None,
        );
        assert!(matches!(result, Err(e) if e.is_fatal()));
    }

    #[test]
    fn test_round_trip_flat_restores_pool() {
        let (temp_dir, config) = flat_dataset();
        let structurer = FolderStructurer::new(&config);
        let before = snapshot(temp_dir.path());

        structurer
            .structure(
                &config.patients_folder,
                LayoutCategory::FlatImagesPooledSegmentations,
                config.segmentations_folder.as_deref(),
            )
            .unwrap();
        // A SEG file written by the converter between both calls
        touch(
            &config
                .patients_folder
                .join("Patient1/segmentations/Patient1_CT_0.SEG.dcm"),
            "seg",
        );

        let report = structurer.destructure(&config.patients_folder).unwrap();
        assert!(report.is_success());

        let mut after = snapshot(temp_dir.path());
        assert_eq!(
            after.remove(Path::new("Patients/Patient1/Patient1_CT_0.SEG.dcm")),
            Some("seg".to_string())
        );
        assert_eq!(after, before);
        assert!(!config.patients_folder.join("Patient1/images").exists());
        assert!(StructureManifest::load(&config.patients_folder)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_round_trip_hierarchical_with_name_collisions() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig::default_data_root(temp_dir.path())
            .with_patient_number_prefix("Patient");
        let patients = &config.patients_folder;
        let pooled = config.segmentations_folder.clone().unwrap();
        touch(&patients.join("Patient1/study1/series1/CT0.dcm"), "s1-ct0");
        touch(&patients.join("Patient1/study1/series1/CT1.dcm"), "s1-ct1");
        touch(&patients.join("Patient1/study1/series2/CT0.dcm"), "s2-ct0");
        touch(&pooled.join("Patient1_CT.nrrd"), "seg");
        let before = snapshot(temp_dir.path());

        let structurer = FolderStructurer::new(&config);
        let category = LayoutClassifier::new(&config).classify(patients);
        assert_eq!(category, LayoutCategory::HierarchicalImagesPooledSegmentations);

        let report = structurer.structure(patients, category, Some(&pooled)).unwrap();
        assert_eq!(report.moved, 4);
        assert_eq!(list_files(&patients.join("Patient1/images")).unwrap().len(), 3);
        assert!(!patients.join("Patient1/study1").exists());

        structurer.destructure(patients).unwrap();
        assert_eq!(snapshot(temp_dir.path()), before);
    }

    #[test]
    fn test_destructure_leave_in_patient_folder() {
        let (_temp_dir, config) = flat_dataset();
        let config = config.with_segmentations_placement(SegmentationsPlacement::LeaveInPatientFolder);
        let structurer = FolderStructurer::new(&config);
        let patients = &config.patients_folder;

        structurer
            .structure(
                patients,
                LayoutCategory::FlatImagesPooledSegmentations,
                config.segmentations_folder.as_deref(),
            )
            .unwrap();
        structurer.destructure(patients).unwrap();

        assert!(patients.join("Patient1/IM0.dcm").is_file());
        assert!(patients.join("Patient1/Patient1_CT.nrrd").is_file());
        assert!(!config
            .segmentations_folder
            .unwrap()
            .join("Patient1_CT.nrrd")
            .exists());
    }

    #[test]
    fn test_destructure_canonical_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig::default_data_root(temp_dir.path());
        let patients = &config.patients_folder;
        touch(&patients.join("P1/images/IM0.dcm"), "im");
        touch(&patients.join("P1/segmentations/CT.nrrd"), "seg");
        let before = snapshot(temp_dir.path());

        let structurer = FolderStructurer::new(&config);
        structurer
            .structure(patients, LayoutCategory::PerPatientSegmentations, None)
            .unwrap();
        let report = structurer.destructure(patients).unwrap();

        assert_eq!(report.moved, 0);
        assert_eq!(snapshot(temp_dir.path()), before);
    }

    #[test]
    fn test_destructure_without_manifest_flattens() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig::default_data_root(temp_dir.path());
        let patients = &config.patients_folder;
        touch(&patients.join("P1/images/IM0.dcm"), "im");
        touch(&patients.join("P1/segmentations/CT_0.SEG.dcm"), "seg");

        let report = FolderStructurer::new(&config).destructure(patients).unwrap();

        assert_eq!(report.moved, 2);
        assert!(patients.join("P1/IM0.dcm").is_file());
        assert!(patients.join("P1/CT_0.SEG.dcm").is_file());
        assert!(!patients.join("P1/images").exists());
        assert!(!patients.join("P1/segmentations").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_destructure_patient_error_does_not_stop_others() {
        let temp_dir = TempDir::new().unwrap();
        let config = PipelineConfig::default_data_root(temp_dir.path());
        let patients = &config.patients_folder;
        touch(&patients.join("P2/images/IM0.dcm"), "im");
        // A symlinked sub-folder lists fine but cannot be removed
        let elsewhere = temp_dir.path().join("elsewhere");
        fs::create_dir_all(&elsewhere).unwrap();
        fs::create_dir_all(patients.join("P1")).unwrap();
        std::os::unix::fs::symlink(&elsewhere, patients.join("P1/images")).unwrap();

        let report = FolderStructurer::new(&config).destructure(patients).unwrap();

        assert_eq!(report.patients, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, patients.join("P1"));
        assert!(patients.join("P2/IM0.dcm").is_file());
        assert!(!patients.join("P2/images").exists());
    }
}
