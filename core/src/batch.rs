//! Batch driver: classify, structure, convert every patient, destructure

use crate::assembler::{DicomSegAssembler, WriteOptions, WriteReport};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::layout::{FolderStructurer, LayoutClassifier, StructureReport};
use crate::metadata::SegMetadataSpec;
use crate::types::{LayoutCategory, PatientRecord};
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::PathBuf;

/// Conversion result of one patient
#[derive(Debug)]
pub struct PatientOutcome {
    pub identifier: String,
    pub path: PathBuf,
    pub result: Result<WriteReport>,
}

impl PatientOutcome {
    /// Whether the patient and all of its segmentations were converted
    pub fn is_success(&self) -> bool {
        matches!(&self.result, Ok(report) if report.is_success())
    }
}

/// Outcome of a full pipeline run
#[derive(Debug)]
pub struct BatchReport {
    pub category: LayoutCategory,
    pub structure: StructureReport,
    pub patients: Vec<PatientOutcome>,
    pub destructure: Option<StructureReport>,
}

impl BatchReport {
    /// Whether every step succeeded for every file
    pub fn is_success(&self) -> bool {
        self.structure.is_success()
            && self.patients.iter().all(PatientOutcome::is_success)
            && self
                .destructure
                .as_ref()
                .map_or(true, StructureReport::is_success)
    }

    /// Number of SEG files written
    pub fn output_count(&self) -> usize {
        self.patients
            .iter()
            .filter_map(|p| p.result.as_ref().ok())
            .map(|r| r.outputs.len())
            .sum()
    }
}

/// Converts every patient of a canonical tree, in parallel
///
/// Patients are independent: a failing patient is logged and recorded in its
/// [`PatientOutcome`] while the others carry on.
pub fn convert_patients(
    patients: &[PatientRecord],
    config: &PipelineConfig,
    metadata: &SegMetadataSpec,
    assembler: &DicomSegAssembler,
) -> Vec<PatientOutcome> {
    let options = WriteOptions::from(config);
    patients
        .par_iter()
        .map(|patient| {
            let images = patient.path.join(&config.patient_images_folder_name);
            let segmentations = patient.path.join(&config.patient_segmentations_folder_name);
            let result = assembler.write(&images, &segmentations, metadata, &options);
            match &result {
                Ok(report) => {
                    for failure in &report.failures {
                        warn!(
                            "Patient {} ({}): {}",
                            patient.identifier,
                            patient.path.display(),
                            failure.error
                        );
                    }
                }
                Err(e) => error!(
                    "Patient {} ({}) failed: {}",
                    patient.identifier,
                    patient.path.display(),
                    e
                ),
            }
            PatientOutcome {
                identifier: patient.identifier.clone(),
                path: patient.path.clone(),
                result,
            }
        })
        .collect()
}

/// The whole conversion pipeline, configured once
pub struct Pipeline {
    config: PipelineConfig,
    classifier: LayoutClassifier,
    structurer: FolderStructurer,
    assembler: DicomSegAssembler,
}

impl Pipeline {
    /// Creates a pipeline with the default collaborators
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            classifier: LayoutClassifier::new(&config),
            structurer: FolderStructurer::new(&config),
            assembler: DicomSegAssembler::default(),
            config,
        }
    }

    /// Builder: Replace the assembler
    pub fn with_assembler(mut self, assembler: DicomSegAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    /// Builder: Replace the folder structurer
    pub fn with_structurer(mut self, structurer: FolderStructurer) -> Self {
        self.structurer = structurer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Classifies the patients folder
    pub fn classify(&self) -> LayoutCategory {
        self.classifier.classify(&self.config.patients_folder)
    }

    /// Classifies then structures the patients folder
    pub fn structure(&self) -> Result<StructureReport> {
        let category = self.classify();
        info!(
            "{} classified as {}",
            self.config.patients_folder.display(),
            category
        );
        self.structurer.structure(
            &self.config.patients_folder,
            category,
            self.config.segmentations_folder.as_deref(),
        )
    }

    /// Converts the segmentations of every patient of a structured tree
    pub fn write(&self) -> Result<Vec<PatientOutcome>> {
        let metadata = SegMetadataSpec::from_file(&self.config.metadata_json)?;
        self.convert(&metadata)
    }

    /// Reverts the structuring
    pub fn destructure(&self) -> Result<StructureReport> {
        self.structurer.destructure(&self.config.patients_folder)
    }

    /// Runs classify, structure, write and optionally destructure
    ///
    /// # Errors
    ///
    /// Fails on an unrecognised layout or an unreadable metadata file before
    /// anything is moved. Per-patient failures are reported, not returned.
    pub fn run(&self, destructure: bool) -> Result<BatchReport> {
        let metadata = SegMetadataSpec::from_file(&self.config.metadata_json)?;
        let structure = self.structure()?;
        let category = structure.category;

        let patients = self.convert(&metadata)?;
        let destructure = if destructure {
            Some(self.destructure()?)
        } else {
            None
        };

        let report = BatchReport {
            category,
            structure,
            patients,
            destructure,
        };
        info!(
            "{} SEG file(s) written for {} patient(s)",
            report.output_count(),
            report.patients.len()
        );
        Ok(report)
    }

    fn convert(&self, metadata: &SegMetadataSpec) -> Result<Vec<PatientOutcome>> {
        // Same identifiers as the structuring step
        let patients =
            PatientRecord::scan(&self.config.patients_folder, self.structurer.matcher())?;
        info!("Converting segmentations of {} patient(s)", patients.len());
        Ok(convert_patients(&patients, &self.config, metadata, &self.assembler))
    }
}
