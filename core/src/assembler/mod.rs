//! Conversion of a patient's segmentation files into DICOM-SEG objects

mod selection;

use crate::config::{EncoderOptions, PipelineConfig};
use crate::decode::{
    is_seg_output, segmentation_stem, ResearchFormatDecoder, VolumeDecoder, SEG_OUTPUT_SUFFIX,
};
use crate::encode::{DicomSegEncoder, SegEncodeRequest, SegEncoder};
use crate::error::{DicomSegError, Result};
use crate::fs_utils::{list_files, write_durably};
use crate::metadata::{SegMetadataSpec, SegmentDescriptor};
use crate::resample::SegmentationResampler;
use crate::series::{DicomSeriesResolver, ImageSeries, SeriesResolver};
use crate::types::LabelVolume;
use log::{debug, info, warn};
use selection::select_series;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Behaviour switches of [`DicomSegAssembler::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Resample segmentations whose grid differs from the reference series
    pub resample_segmentation_to_source_image_size: bool,

    /// Delete each source file once all of its SEG files are written
    pub delete_itk_segmentation_files: bool,

    /// Write one SEG per matching series instead of picking a single one
    pub enable_multi_images_association: bool,

    pub encoder: EncoderOptions,
}

impl From<&PipelineConfig> for WriteOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            resample_segmentation_to_source_image_size: config
                .resample_segmentation_to_source_image_size,
            delete_itk_segmentation_files: config.delete_itk_segmentation_files,
            enable_multi_images_association: config.enable_multi_images_association,
            encoder: config.encoder,
        }
    }
}

/// A segmentation file that could not be converted
#[derive(Debug)]
pub struct SegmentationFailure {
    pub segmentation: PathBuf,
    pub error: DicomSegError,
}

/// Outcome of converting one patient's segmentations
#[derive(Debug, Default)]
pub struct WriteReport {
    /// SEG files written, in creation order
    pub outputs: Vec<PathBuf>,

    /// Segmentation files that failed; the others were still converted
    pub failures: Vec<SegmentationFailure>,
}

impl WriteReport {
    /// Whether every segmentation file was converted
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives series resolution, decoding, resampling and encoding
///
/// Collaborators are injected as trait objects; [`DicomSegAssembler::default`]
/// wires the DICOM header resolver, the research-format decoders and the
/// binary SEG encoder.
pub struct DicomSegAssembler {
    resolver: Box<dyn SeriesResolver>,
    decoder: Box<dyn VolumeDecoder>,
    encoder: Box<dyn SegEncoder>,
    resampler: SegmentationResampler,
}

impl Default for DicomSegAssembler {
    fn default() -> Self {
        Self::new(
            Box::new(DicomSeriesResolver::new()),
            Box::new(ResearchFormatDecoder::new()),
            Box::new(DicomSegEncoder::new()),
        )
    }
}

impl DicomSegAssembler {
    /// Creates an assembler from its collaborators
    pub fn new(
        resolver: Box<dyn SeriesResolver>,
        decoder: Box<dyn VolumeDecoder>,
        encoder: Box<dyn SegEncoder>,
    ) -> Self {
        Self {
            resolver,
            decoder,
            encoder,
            resampler: SegmentationResampler::new(),
        }
    }

    /// Converts every segmentation file of a patient
    ///
    /// Outputs are written next to their source as `<stem>_<n>.SEG.dcm`.
    /// Sources sharing a stem (`CT.nii.gz`, `CT.nrrd`) keep their extension in
    /// it (`CT_nii_gz`, `CT_nrrd`), and no output is written twice in one
    /// call. A failing file is recorded in [`WriteReport::failures`] and does not
    /// stop the others.
    ///
    /// # Errors
    ///
    /// Patient-level failures only: [`DicomSegError::NoReferenceSeries`] when
    /// the images folder holds no series, resolver errors, and I/O errors
    /// listing the segmentations folder.
    pub fn write(
        &self,
        images_path: &Path,
        segmentations_path: &Path,
        metadata: &SegMetadataSpec,
        options: &WriteOptions,
    ) -> Result<WriteReport> {
        let series = self.resolver.resolve_series(images_path)?;
        if series.is_empty() {
            return Err(DicomSegError::NoReferenceSeries(images_path.to_path_buf()));
        }
        debug!(
            "{} series found in {}",
            series.len(),
            images_path.display()
        );

        let sources = segmentation_files(segmentations_path)?;
        let stems = output_stems(&sources);
        let mut reserved = HashSet::new();
        let mut report = WriteReport::default();
        for (segmentation, stem) in sources.into_iter().zip(stems) {
            let mut outputs = Vec::new();
            let result = self.convert(
                &segmentation,
                &stem,
                &series,
                metadata,
                options,
                &mut reserved,
                &mut outputs,
            );
            match result {
                Ok(()) => {
                    info!(
                        "Converted {} into {} SEG file(s)",
                        segmentation.display(),
                        outputs.len()
                    );
                    if options.delete_itk_segmentation_files {
                        if let Err(e) = fs::remove_file(&segmentation) {
                            warn!(
                                "Cannot delete converted segmentation {}: {}",
                                segmentation.display(),
                                e
                            );
                        }
                    }
                    report.outputs.extend(outputs);
                }
                Err(error) => {
                    warn!("Cannot convert {}: {}", segmentation.display(), error);
                    // Outputs written before the failure are kept
                    report.outputs.extend(outputs);
                    report.failures.push(SegmentationFailure {
                        segmentation,
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Converts one segmentation file, pushing each written path to `outputs`
    #[allow(clippy::too_many_arguments)]
    fn convert(
        &self,
        segmentation: &Path,
        stem: &str,
        series: &[ImageSeries],
        metadata: &SegMetadataSpec,
        options: &WriteOptions,
        reserved: &mut HashSet<PathBuf>,
        outputs: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let volume = self.decoder.decode_volume(segmentation)?;
        if volume.is_empty() {
            return Err(DicomSegError::EmptySegmentation(segmentation.to_path_buf()));
        }

        let targets = select_series(
            segmentation,
            &volume.geometry,
            series,
            options.enable_multi_images_association,
        )?;

        let output_dir = segmentation.parent().unwrap_or_else(|| Path::new("."));
        for (n, target) in targets.into_iter().enumerate() {
            let output = output_dir.join(format!("{}_{}{}", stem, n, SEG_OUTPUT_SUFFIX));
            if !reserved.insert(output.clone()) {
                return Err(DicomSegError::OutputCollision {
                    segmentation: segmentation.to_path_buf(),
                    output,
                });
            }

            let on_grid = self.fit_to_series(segmentation, &volume, target, options)?;
            let segments = describe_labels(segmentation, &on_grid, metadata, &options.encoder)?;

            let request = SegEncodeRequest {
                volume: &on_grid,
                series: target,
                segments,
                metadata,
                options: options.encoder,
            };
            let bytes = self.encoder.encode_seg(&request)?;
            write_durably(&output, &bytes)?;
            debug!(
                "Wrote {} referencing series {}",
                output.display(),
                target
            );
            outputs.push(output);
        }
        Ok(())
    }

    /// Returns the volume on the series grid, resampling when allowed
    fn fit_to_series(
        &self,
        segmentation: &Path,
        volume: &LabelVolume,
        series: &ImageSeries,
        options: &WriteOptions,
    ) -> Result<LabelVolume> {
        if volume.geometry.approx_eq(&series.geometry) {
            // Snap onto the exact series grid so that frame positions match
            return LabelVolume::new(volume.data.clone(), series.geometry)
                .map_err(DicomSegError::IncompatibleGeometry);
        }
        if !options.resample_segmentation_to_source_image_size {
            return Err(DicomSegError::GeometryMismatch {
                segmentation: segmentation.to_path_buf(),
                series: series.series_instance_uid.clone(),
            });
        }
        debug!(
            "Resampling {} onto series {}",
            segmentation.display(),
            series
        );
        let resampled = self.resampler.resample(volume.clone(), &series.geometry)?;
        if resampled.is_empty() {
            return Err(DicomSegError::EmptySegmentation(segmentation.to_path_buf()));
        }
        Ok(resampled)
    }
}

/// Visible segmentation files of a folder, excluding written SEG outputs
fn segmentation_files(segmentations_path: &Path) -> Result<Vec<PathBuf>> {
    if !segmentations_path.is_dir() {
        warn!(
            "Segmentations folder {} does not exist",
            segmentations_path.display()
        );
        return Ok(Vec::new());
    }
    Ok(list_files(segmentations_path)?
        .into_iter()
        .filter(|path| !is_seg_output(path))
        .collect())
}

/// Output stem of each source, in order
///
/// A stem shared by several sources is replaced by the full file name with
/// its dots turned into underscores.
fn output_stems(sources: &[PathBuf]) -> Vec<String> {
    let stems: Vec<String> = sources.iter().map(|path| segmentation_stem(path)).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.as_str()).or_default() += 1;
    }
    sources
        .iter()
        .zip(&stems)
        .map(|(path, stem)| {
            if counts.get(stem.as_str()).copied().unwrap_or_default() > 1 {
                path.file_name()
                    .map(|name| name.to_string_lossy().replace('.', "_"))
                    .unwrap_or_else(|| stem.clone())
            } else {
                stem.clone()
            }
        })
        .collect()
}

/// Descriptors of the labels present in `volume`, in label order
fn describe_labels<'a>(
    segmentation: &Path,
    volume: &LabelVolume,
    metadata: &'a SegMetadataSpec,
    options: &EncoderOptions,
) -> Result<Vec<&'a SegmentDescriptor>> {
    let labels = volume.labels();
    let mut segments = Vec::with_capacity(labels.len());
    for label in &labels {
        match metadata.descriptor_for(*label) {
            Some(descriptor) => segments.push(descriptor),
            None if options.skip_missing_segment => {
                warn!(
                    "Label {} of {} has no segment descriptor, skipping it",
                    label,
                    segmentation.display()
                );
            }
            None => {
                return Err(DicomSegError::UnknownSegmentLabel {
                    label: *label,
                    segmentation: segmentation.to_path_buf(),
                })
            }
        }
    }
    if segments.is_empty() {
        // Every label was skipped
        return Err(DicomSegError::UnknownSegmentLabel {
            label: labels.first().copied().unwrap_or_default(),
            segmentation: segmentation.to_path_buf(),
        });
    }
    Ok(segments)
}
