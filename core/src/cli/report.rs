use crate::assembler::WriteReport;
use crate::batch::{BatchReport, PatientOutcome};
use crate::layout::StructureReport;
use crate::types::LayoutCategory;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Text report for a `structure` or `destructure` run
pub struct StructureTextReport<'a> {
    title: &'a str,
    report: &'a StructureReport,
}

impl<'a> StructureTextReport<'a> {
    /// Creates a new text report
    pub fn new(title: &'a str, report: &'a StructureReport) -> Self {
        Self { title, report }
    }
}

impl<'a> fmt::Display for StructureTextReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", "=".repeat(self.title.len()))?;
        writeln!(f)?;
        writeln!(f, "Layout:    {}", self.report.category)?;
        writeln!(f, "Patients:  {}", self.report.patients)?;
        writeln!(f, "Moved:     {}", self.report.moved)?;
        writeln!(f, "Failures:  {}", self.report.failures.len())?;
        for failure in &self.report.failures {
            writeln!(f, "  {}: {}", failure.path.display(), failure.error)?;
        }
        Ok(())
    }
}

/// Text report for the conversion of a batch of patients
pub struct WriteTextReport<'a> {
    patients: &'a [PatientOutcome],
}

impl<'a> WriteTextReport<'a> {
    /// Creates a new text report
    pub fn new(patients: &'a [PatientOutcome]) -> Self {
        Self { patients }
    }
}

impl<'a> fmt::Display for WriteTextReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DICOM-SEG Conversion")?;
        writeln!(f, "====================")?;
        writeln!(f)?;

        for patient in self.patients {
            write!(f, "{}: ", patient.identifier)?;
            match &patient.result {
                Ok(report) => {
                    writeln!(
                        f,
                        "{} written, {} failed",
                        report.outputs.len(),
                        report.failures.len()
                    )?;
                    for output in &report.outputs {
                        writeln!(f, "  + {}", output.display())?;
                    }
                    for failure in &report.failures {
                        writeln!(
                            f,
                            "  ! {}: {}",
                            failure.segmentation.display(),
                            failure.error
                        )?;
                    }
                }
                Err(e) => writeln!(f, "failed: {}", e)?,
            }
        }
        Ok(())
    }
}

/// Text report for a full pipeline run
pub struct BatchTextReport<'a> {
    report: &'a BatchReport,
}

impl<'a> BatchTextReport<'a> {
    /// Creates a new text report
    pub fn new(report: &'a BatchReport) -> Self {
        Self { report }
    }
}

impl<'a> fmt::Display for BatchTextReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            StructureTextReport::new("Structure", &self.report.structure)
        )?;
        writeln!(f)?;
        write!(f, "{}", WriteTextReport::new(&self.report.patients))?;
        if let Some(destructure) = &self.report.destructure {
            writeln!(f)?;
            write!(f, "{}", StructureTextReport::new("Destructure", destructure))?;
        }
        writeln!(f)?;
        writeln!(f, "SEG files: {}", self.report.output_count())?;
        writeln!(
            f,
            "Status:    {}",
            if self.report.is_success() {
                "ok"
            } else {
                "completed with failures"
            }
        )?;
        Ok(())
    }
}

/// A failure, serialised with its message
#[derive(Debug, Serialize)]
pub struct FailureJson {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StructureJson {
    pub category: LayoutCategory,
    pub patients: usize,
    pub moved: usize,
    pub failures: Vec<FailureJson>,
}

impl From<&StructureReport> for StructureJson {
    fn from(report: &StructureReport) -> Self {
        Self {
            category: report.category,
            patients: report.patients,
            moved: report.moved,
            failures: report
                .failures
                .iter()
                .map(|f| FailureJson {
                    path: f.path.clone(),
                    error: f.error.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PatientJson {
    pub identifier: String,
    pub path: PathBuf,
    pub outputs: Vec<PathBuf>,
    pub failures: Vec<FailureJson>,
    /// Patient-level error, when no segmentation could be processed
    pub error: Option<String>,
}

impl From<&PatientOutcome> for PatientJson {
    fn from(outcome: &PatientOutcome) -> Self {
        let (outputs, failures, error) = match &outcome.result {
            Ok(WriteReport { outputs, failures }) => (
                outputs.clone(),
                failures
                    .iter()
                    .map(|f| FailureJson {
                        path: f.segmentation.clone(),
                        error: f.error.to_string(),
                    })
                    .collect(),
                None,
            ),
            Err(e) => (Vec::new(), Vec::new(), Some(e.to_string())),
        };
        Self {
            identifier: outcome.identifier.clone(),
            path: outcome.path.clone(),
            outputs,
            failures,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchJson {
    pub category: LayoutCategory,
    pub success: bool,
    pub structure: StructureJson,
    pub patients: Vec<PatientJson>,
    pub destructure: Option<StructureJson>,
}

impl From<&BatchReport> for BatchJson {
    fn from(report: &BatchReport) -> Self {
        Self {
            category: report.category,
            success: report.is_success(),
            structure: StructureJson::from(&report.structure),
            patients: report.patients.iter().map(PatientJson::from).collect(),
            destructure: report.destructure.as_ref().map(StructureJson::from),
        }
    }
}
