pub mod report;

use crate::config::{PipelineConfig, SegmentationsPlacement};
use crate::error::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Command-line arguments for dicomseg
#[derive(Parser, Debug)]
#[command(name = "dicomseg")]
#[command(about = "Convert research-format segmentations into DICOM-SEG objects")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file; flags override its values
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Data folder holding Patients/, Segmentations/ and metadata.json
    #[arg(long, global = true, value_name = "DIR")]
    pub data_root: Option<PathBuf>,

    /// Patients folder
    #[arg(long, global = true, value_name = "DIR")]
    pub patients: Option<PathBuf>,

    /// Pooled segmentations folder
    #[arg(long, global = true, value_name = "DIR")]
    pub segmentations: Option<PathBuf>,

    /// dcmqi metainfo JSON describing the segments
    #[arg(long, global = true, value_name = "FILE")]
    pub metadata: Option<PathBuf>,

    /// Marker preceding the patient identifier in file names
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Resample segmentations onto the reference image grid
    #[arg(long, global = true)]
    pub resample: bool,

    /// Delete source segmentation files once converted
    #[arg(long, global = true)]
    pub delete_sources: bool,

    /// Write one SEG per matching image series
    #[arg(long, global = true)]
    pub multi_image: bool,

    /// Omit frames without any voxel of their segment
    #[arg(long, global = true)]
    pub skip_empty_slices: bool,

    /// Drop labels without a segment descriptor instead of failing
    #[arg(long, global = true)]
    pub skip_missing_segment: bool,

    /// Where destructure puts recorded segmentation files
    #[arg(long, global = true, value_enum)]
    pub placement: Option<PlacementArg>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Pipeline steps
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the layout category of the patients folder
    Classify,
    /// Rearrange the patients folder into the canonical layout
    Structure,
    /// Convert the segmentations of a structured patients folder
    Write,
    /// Revert a previous structure run
    Destructure,
    /// Classify, structure and convert in one go
    Run {
        /// Revert the structuring once converted
        #[arg(long)]
        destructure: bool,
    },
}

/// Output format options
#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON format
    Json,
}

/// Destructure placement options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PlacementArg {
    /// Move segmentation files back to the pooled folder
    RestorePooled,
    /// Leave segmentation files in the patient folder
    LeaveInPatientFolder,
}

impl From<PlacementArg> for SegmentationsPlacement {
    fn from(arg: PlacementArg) -> Self {
        match arg {
            PlacementArg::RestorePooled => SegmentationsPlacement::RestorePooled,
            PlacementArg::LeaveInPatientFolder => SegmentationsPlacement::LeaveInPatientFolder,
        }
    }
}

impl Cli {
    /// Builds the pipeline configuration
    ///
    /// Starts from `--config` when given, else from `--data-root`, else from
    /// the defaults, then applies every flag that was set.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match (&self.config, &self.data_root) {
            (Some(path), _) => PipelineConfig::from_json_file(path)?,
            (None, Some(root)) => PipelineConfig::default_data_root(root),
            (None, None) => PipelineConfig::default(),
        };

        if let Some(patients) = &self.patients {
            config = config.with_patients_folder(patients);
        }
        if let Some(segmentations) = &self.segmentations {
            config = config.with_segmentations_folder(segmentations);
        }
        if let Some(metadata) = &self.metadata {
            config = config.with_metadata_json(metadata);
        }
        if let Some(prefix) = &self.prefix {
            config = config.with_patient_number_prefix(prefix);
        }
        if let Some(placement) = self.placement {
            config = config.with_segmentations_placement(placement.into());
        }
        // Flags only ever switch options on
        config.resample_segmentation_to_source_image_size |= self.resample;
        config.delete_itk_segmentation_files |= self.delete_sources;
        config.enable_multi_images_association |= self.multi_image;
        config.encoder.skip_empty_slices |= self.skip_empty_slices;
        config.encoder.skip_missing_segment |= self.skip_missing_segment;

        config.validate()?;
        Ok(config)
    }
}
