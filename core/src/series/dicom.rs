use super::{ImageSeries, SeriesInstance, SeriesResolver};
use crate::error::{DicomSegError, Result};
use crate::fs_utils::list_files_recursive;
use crate::tags::{
    get_f64_value, get_int_value, get_multi_f64_value, get_non_empty_string_value,
    get_u16_value, ACCESSION_NUMBER, COLUMNS, FRAME_OF_REFERENCE_UID, IMAGE_ORIENTATION_PATIENT,
    IMAGE_POSITION_PATIENT, INSTANCE_NUMBER, MODALITY, NUMBER_OF_FRAMES, PATIENT_BIRTH_DATE,
    PATIENT_ID, PATIENT_NAME, PATIENT_SEX, PIXEL_DATA, PIXEL_SPACING, REFERRING_PHYSICIAN_NAME,
    ROWS, SERIES_DESCRIPTION, SERIES_INSTANCE_UID, SLICE_THICKNESS, SOP_CLASS_UID,
    SOP_INSTANCE_UID, SPACING_BETWEEN_SLICES, STUDY_DATE, STUDY_ID, STUDY_INSTANCE_UID,
    STUDY_TIME,
};
use crate::types::{cross, dot, Geometry, GEOMETRY_TOLERANCE};
use dicom_object::{InMemDicomObject, OpenFileOptions};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Modality of DICOM-SEG objects, which are never reference images
const SEG_MODALITY: &str = "SEG";

/// Default Image Orientation (Patient) when the tag is missing
const DEFAULT_ORIENTATION: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

/// Resolves image series by reading DICOM headers
///
/// Files are read up to (not including) Pixel Data. Files that are not DICOM
/// and DICOM-SEG objects are skipped.
#[derive(Debug, Default, Clone)]
pub struct DicomSeriesResolver;

impl DicomSeriesResolver {
    /// Creates a new DicomSeriesResolver
    pub fn new() -> Self {
        Self
    }
}

/// Per-slice header values needed to order a series and build its grid
#[derive(Debug)]
struct Slice {
    instance: SeriesInstance,
    instance_number: Option<i32>,
    position: Option<[f64; 3]>,
}

/// Grid attributes shared by all slices of a series
#[derive(Debug, Default)]
struct PlaneInfo {
    orientation: Option<[f64; 6]>,
    pixel_spacing: Option<[f64; 2]>,
    rows: u16,
    columns: u16,
    slice_thickness: Option<f64>,
    spacing_between_slices: Option<f64>,
}

impl SeriesResolver for DicomSeriesResolver {
    fn resolve_series(&self, images_path: &Path) -> Result<Vec<ImageSeries>> {
        let mut groups: BTreeMap<String, (ImageSeries, PlaneInfo, Vec<Slice>)> = BTreeMap::new();
        let mut patient_ids = BTreeSet::new();

        for path in list_files_recursive(images_path)? {
            let dcm = match OpenFileOptions::new()
                .read_until(PIXEL_DATA)
                .open_file(&path)
            {
                Ok(dcm) => dcm,
                Err(e) => {
                    debug!("Skipping non-DICOM file {}: {}", path.display(), e);
                    continue;
                }
            };

            if get_non_empty_string_value(&dcm, MODALITY).as_deref() == Some(SEG_MODALITY) {
                debug!("Skipping DICOM-SEG object {}", path.display());
                continue;
            }
            let Some(series_uid) = get_non_empty_string_value(&dcm, SERIES_INSTANCE_UID) else {
                warn!("Skipping {}: no Series Instance UID", path.display());
                continue;
            };
            if let Some(patient_id) = get_non_empty_string_value(&dcm, PATIENT_ID) {
                patient_ids.insert(patient_id);
            }
            if get_int_value(&dcm, NUMBER_OF_FRAMES).unwrap_or(1) > 1 {
                warn!(
                    "{} is a multi-frame image; only its first frame position is used",
                    path.display()
                );
            }

            let slice = read_slice(path, &dcm);
            let (_, _, slices) = groups.entry(series_uid.clone()).or_insert_with(|| {
                (
                    read_series_attributes(series_uid, &dcm),
                    read_plane_info(&dcm),
                    Vec::new(),
                )
            });
            slices.push(slice);
        }

        if patient_ids.len() > 1 {
            return Err(DicomSegError::InconsistentPatient {
                path: images_path.to_path_buf(),
                patient_ids: patient_ids.into_iter().collect(),
            });
        }

        let mut series: Vec<ImageSeries> = groups
            .into_values()
            .map(|(mut series, plane, mut slices)| {
                series.geometry = build_geometry(&plane, &mut slices);
                series.instances = slices.into_iter().map(|s| s.instance).collect();
                debug!("Series {}: {}", series, series.geometry);
                series
            })
            .collect();
        series.sort_by(|a, b| {
            (&a.study_instance_uid, &a.series_instance_uid)
                .cmp(&(&b.study_instance_uid, &b.series_instance_uid))
        });

        info!(
            "Found {} image series in {}",
            series.len(),
            images_path.display()
        );
        Ok(series)
    }
}

fn read_slice(path: PathBuf, dcm: &InMemDicomObject) -> Slice {
    Slice {
        instance: SeriesInstance {
            sop_class_uid: get_non_empty_string_value(dcm, SOP_CLASS_UID).unwrap_or_default(),
            sop_instance_uid: get_non_empty_string_value(dcm, SOP_INSTANCE_UID).unwrap_or_default(),
            path,
        },
        instance_number: get_int_value(dcm, INSTANCE_NUMBER),
        position: get_multi_f64_value(dcm, IMAGE_POSITION_PATIENT, 3).map(|v| [v[0], v[1], v[2]]),
    }
}

fn read_series_attributes(series_uid: String, dcm: &InMemDicomObject) -> ImageSeries {
    // The grid is only known once every slice has been read
    let placeholder = Geometry::axis_aligned([0.0; 3], [1.0; 3], [0, 0, 0]);
    ImageSeries {
        study_instance_uid: get_non_empty_string_value(dcm, STUDY_INSTANCE_UID),
        frame_of_reference_uid: get_non_empty_string_value(dcm, FRAME_OF_REFERENCE_UID),
        patient_id: get_non_empty_string_value(dcm, PATIENT_ID),
        patient_name: get_non_empty_string_value(dcm, PATIENT_NAME),
        patient_birth_date: get_non_empty_string_value(dcm, PATIENT_BIRTH_DATE),
        patient_sex: get_non_empty_string_value(dcm, PATIENT_SEX),
        study_date: get_non_empty_string_value(dcm, STUDY_DATE),
        study_time: get_non_empty_string_value(dcm, STUDY_TIME),
        study_id: get_non_empty_string_value(dcm, STUDY_ID),
        accession_number: get_non_empty_string_value(dcm, ACCESSION_NUMBER),
        referring_physician_name: get_non_empty_string_value(dcm, REFERRING_PHYSICIAN_NAME),
        modality: get_non_empty_string_value(dcm, MODALITY),
        series_description: get_non_empty_string_value(dcm, SERIES_DESCRIPTION),
        ..ImageSeries::new(series_uid, placeholder)
    }
}

fn read_plane_info(dcm: &InMemDicomObject) -> PlaneInfo {
    PlaneInfo {
        orientation: get_multi_f64_value(dcm, IMAGE_ORIENTATION_PATIENT, 6)
            .map(|v| [v[0], v[1], v[2], v[3], v[4], v[5]]),
        pixel_spacing: get_multi_f64_value(dcm, PIXEL_SPACING, 2).map(|v| [v[0], v[1]]),
        rows: get_u16_value(dcm, ROWS).unwrap_or(0),
        columns: get_u16_value(dcm, COLUMNS).unwrap_or(0),
        slice_thickness: get_f64_value(dcm, SLICE_THICKNESS),
        spacing_between_slices: get_f64_value(dcm, SPACING_BETWEEN_SLICES),
    }
}

/// Orders the slices along the normal and derives the series grid
fn build_geometry(plane: &PlaneInfo, slices: &mut [Slice]) -> Geometry {
    let o = plane.orientation.unwrap_or(DEFAULT_ORIENTATION);
    let row = [o[0], o[1], o[2]];
    let column = [o[3], o[4], o[5]];
    let normal = cross(row, column);

    let all_positioned = slices.iter().all(|s| s.position.is_some());
    slices.sort_by(|a, b| {
        let by_position = match (a.position, b.position) {
            (Some(pa), Some(pb)) if all_positioned => dot(pa, normal)
                .partial_cmp(&dot(pb, normal))
                .unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        by_position
            .then_with(|| match (a.instance_number, b.instance_number) {
                (Some(na), Some(nb)) => na.cmp(&nb),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.instance.path.cmp(&b.instance.path))
    });

    // Pixel Spacing is (row spacing, column spacing), i.e. (y, x)
    let [row_spacing, column_spacing] = plane.pixel_spacing.unwrap_or([1.0, 1.0]);

    let tag_spacing = plane
        .spacing_between_slices
        .or(plane.slice_thickness)
        .filter(|s| *s > 0.0)
        .unwrap_or(1.0);
    let positions: Vec<[f64; 3]> = slices.iter().filter_map(|s| s.position).collect();
    let slice_spacing = match (positions.first(), positions.last()) {
        (Some(first), Some(last)) if positions.len() > 1 && all_positioned => {
            let distance = (dot(*last, normal) - dot(*first, normal)) / (positions.len() - 1) as f64;
            if distance > GEOMETRY_TOLERANCE {
                distance
            } else {
                tag_spacing
            }
        }
        _ => tag_spacing,
    };

    let origin = slices
        .first()
        .and_then(|s| s.position)
        .unwrap_or([0.0; 3]);
    let direction = [
        [row[0], column[0], normal[0]],
        [row[1], column[1], normal[1]],
        [row[2], column[2], normal[2]],
    ];

    Geometry::new(
        origin,
        [column_spacing, row_spacing, slice_spacing],
        direction,
        [plane.columns as usize, plane.rows as usize, slices.len()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::value::PrimitiveValue;
    use dicom_core::{DataElement, VR};
    use dicom_object::FileMetaTableBuilder;
    use std::fs;
    use tempfile::TempDir;

    const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

    fn ds(values: &[f64]) -> PrimitiveValue {
        PrimitiveValue::Strs(
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .into(),
        )
    }

    fn write_slice(path: &Path, series_uid: &str, patient_id: &str, modality: &str, z: f64, number: i32) {
        let sop_instance_uid = format!("{}.{}", series_uid, number);
        let mut dcm = InMemDicomObject::new_empty();
        dcm.put(DataElement::new(SOP_CLASS_UID, VR::UI, PrimitiveValue::from(CT_IMAGE_STORAGE)));
        dcm.put(DataElement::new(
            SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance_uid.as_str()),
        ));
        dcm.put(DataElement::new(PATIENT_ID, VR::LO, PrimitiveValue::from(patient_id)));
        dcm.put(DataElement::new(MODALITY, VR::CS, PrimitiveValue::from(modality)));
        dcm.put(DataElement::new(STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")));
        dcm.put(DataElement::new(SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid)));
        dcm.put(DataElement::new(INSTANCE_NUMBER, VR::IS, PrimitiveValue::from(number.to_string())));
        dcm.put(DataElement::new(IMAGE_POSITION_PATIENT, VR::DS, ds(&[-10.0, -20.0, z])));
        dcm.put(DataElement::new(
            IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            ds(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        ));
        dcm.put(DataElement::new(PIXEL_SPACING, VR::DS, ds(&[0.5, 0.75])));
        dcm.put(DataElement::new(ROWS, VR::US, PrimitiveValue::from(4_u16)));
        dcm.put(DataElement::new(COLUMNS, VR::US, PrimitiveValue::from(3_u16)));
        dcm.put(DataElement::new(PIXEL_DATA, VR::OW, PrimitiveValue::from(vec![0_u8; 24])));

        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_instance_uid.as_str());
        dcm.with_meta(meta).unwrap().write_to_file(path).unwrap();
    }

    #[test]
    fn test_resolve_groups_and_orders_slices() {
        let temp_dir = TempDir::new().unwrap();
        let images = temp_dir.path();
        // File names deliberately in reverse slice order
        write_slice(&images.join("IM0.dcm"), "1.2.3.1", "P1", "CT", 5.0, 3);
        write_slice(&images.join("IM1.dcm"), "1.2.3.1", "P1", "CT", 2.5, 2);
        write_slice(&images.join("IM2.dcm"), "1.2.3.1", "P1", "CT", 0.0, 1);
        write_slice(&images.join("IM3.dcm"), "1.2.3.2", "P1", "CT", 0.0, 1);
        fs::write(images.join("notes.txt"), "not a DICOM file").unwrap();

        let series = DicomSeriesResolver::new().resolve_series(images).unwrap();

        assert_eq!(series.len(), 2);
        let ct = &series[0];
        assert_eq!(ct.series_instance_uid, "1.2.3.1");
        assert_eq!(ct.patient_id.as_deref(), Some("P1"));
        let uids: Vec<_> = ct.instances.iter().map(|i| i.sop_instance_uid.as_str()).collect();
        assert_eq!(uids, vec!["1.2.3.1.1", "1.2.3.1.2", "1.2.3.1.3"]);

        let g = &ct.geometry;
        assert_eq!(g.size, [3, 4, 3]);
        assert_eq!(g.origin, [-10.0, -20.0, 0.0]);
        assert!((g.spacing[0] - 0.75).abs() < 1e-9);
        assert!((g.spacing[1] - 0.5).abs() < 1e-9);
        assert!((g.spacing[2] - 2.5).abs() < 1e-9);

        assert_eq!(series[1].geometry.size, [3, 4, 1]);
        assert!((series[1].geometry.spacing[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_skips_seg_objects() {
        let temp_dir = TempDir::new().unwrap();
        write_slice(&temp_dir.path().join("IM0.dcm"), "1.2.3.1", "P1", "CT", 0.0, 1);
        write_slice(&temp_dir.path().join("CT_0.SEG.dcm"), "1.2.3.9", "P1", "SEG", 0.0, 1);

        let series = DicomSeriesResolver::new()
            .resolve_series(temp_dir.path())
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].series_instance_uid, "1.2.3.1");
    }

    #[test]
    fn test_resolve_rejects_mixed_patients() {
        let temp_dir = TempDir::new().unwrap();
        write_slice(&temp_dir.path().join("IM0.dcm"), "1.2.3.1", "P1", "CT", 0.0, 1);
        write_slice(&temp_dir.path().join("IM1.dcm"), "1.2.3.2", "P2", "CT", 0.0, 1);

        let result = DicomSeriesResolver::new().resolve_series(temp_dir.path());
        assert!(matches!(
            result,
            Err(DicomSegError::InconsistentPatient { patient_ids, .. }) if patient_ids == vec!["P1", "P2"]
        ));
    }

    #[test]
    fn test_resolve_empty_folder() {
        let temp_dir = TempDir::new().unwrap();
        let series = DicomSeriesResolver::new()
            .resolve_series(temp_dir.path())
            .unwrap();
        assert!(series.is_empty());
    }
}
