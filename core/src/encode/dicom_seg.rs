use super::{SegEncodeRequest, SegEncoder};
use crate::error::{DicomSegError, Result};
use crate::metadata::{CodedConcept, SegmentDescriptor};
use crate::series::ImageSeries;
use crate::tags::{
    ACCESSION_NUMBER, ANATOMIC_REGION_SEQUENCE, BITS_ALLOCATED, BITS_STORED, BODY_PART_EXAMINED,
    CLINICAL_TRIAL_SERIES_ID, CLINICAL_TRIAL_TIME_POINT_ID, CODE_MEANING, CODE_VALUE,
    CODING_SCHEME_DESIGNATOR, COLUMNS, CONTENT_CREATOR_NAME, CONTENT_DATE, CONTENT_DESCRIPTION,
    CONTENT_LABEL, CONTENT_TIME, DERIVATION_CODE_SEQUENCE, DERIVATION_IMAGE_SEQUENCE,
    DEVICE_SERIAL_NUMBER, DIMENSION_INDEX_POINTER, DIMENSION_INDEX_SEQUENCE,
    DIMENSION_INDEX_VALUES, DIMENSION_ORGANIZATION_SEQUENCE, DIMENSION_ORGANIZATION_UID,
    FRAME_CONTENT_SEQUENCE, FRAME_OF_REFERENCE_UID, FUNCTIONAL_GROUP_POINTER, HIGH_BIT,
    IMAGE_ORIENTATION_PATIENT, IMAGE_POSITION_PATIENT, IMAGE_TYPE, INSTANCE_CREATION_DATE,
    INSTANCE_CREATION_TIME, INSTANCE_NUMBER, LOSSY_IMAGE_COMPRESSION, MANUFACTURER,
    MANUFACTURER_MODEL_NAME, MODALITY, NUMBER_OF_FRAMES, PATIENT_BIRTH_DATE, PATIENT_ID,
    PATIENT_NAME, PATIENT_SEX, PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE, PHOTOMETRIC_INTERPRETATION,
    PIXEL_DATA, PIXEL_MEASURES_SEQUENCE, PIXEL_REPRESENTATION, PIXEL_SPACING,
    PLANE_ORIENTATION_SEQUENCE, PLANE_POSITION_SEQUENCE, POSITION_REFERENCE_INDICATOR,
    PURPOSE_OF_REFERENCE_CODE_SEQUENCE, RECOMMENDED_DISPLAY_CIELAB_VALUE,
    REFERENCED_INSTANCE_SEQUENCE, REFERENCED_SEGMENT_NUMBER, REFERENCED_SERIES_SEQUENCE,
    REFERENCED_SOP_CLASS_UID, REFERENCED_SOP_INSTANCE_UID, REFERRING_PHYSICIAN_NAME, ROWS,
    SAMPLES_PER_PIXEL, SEGMENTATION_TYPE, SEGMENTED_PROPERTY_CATEGORY_CODE_SEQUENCE,
    SEGMENTED_PROPERTY_TYPE_CODE_SEQUENCE, SEGMENTED_PROPERTY_TYPE_MODIFIER_CODE_SEQUENCE,
    SEGMENT_ALGORITHM_NAME, SEGMENT_ALGORITHM_TYPE, SEGMENT_DESCRIPTION,
    SEGMENT_IDENTIFICATION_SEQUENCE, SEGMENT_LABEL, SEGMENT_NUMBER, SEGMENT_SEQUENCE,
    SERIES_DATE, SERIES_DESCRIPTION, SERIES_INSTANCE_UID, SERIES_NUMBER, SERIES_TIME,
    SHARED_FUNCTIONAL_GROUPS_SEQUENCE, SLICE_THICKNESS, SOFTWARE_VERSIONS, SOP_CLASS_UID,
    SOP_INSTANCE_UID, SOURCE_IMAGE_SEQUENCE, SPACING_BETWEEN_SLICES, SPECIFIC_CHARACTER_SET,
    STUDY_DATE, STUDY_ID, STUDY_INSTANCE_UID, STUDY_TIME,
};
use crate::types::{Geometry, LabelVolume};
use dicom_core::value::{DataSetSequence, PrimitiveValue};
use dicom_core::{DataElement, Tag, VR};
use dicom_dictionary_std::uids::{EXPLICIT_VR_LITTLE_ENDIAN, SEGMENTATION_STORAGE};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use log::{debug, warn};
use uuid::Uuid;

const DEFAULT_SERIES_NUMBER: &str = "300";
const DEFAULT_INSTANCE_NUMBER: &str = "1";
const DEFAULT_SERIES_DESCRIPTION: &str = "Segmentation";
const DEFAULT_CONTENT_LABEL: &str = "SEGMENTATION";

/// Binary DICOM-SEG encoder
///
/// Emits one bit-packed frame per (segment, slice) pair, ordered by segment
/// then by slice. Frame geometry is carried by the Plane Position and Plane
/// Orientation functional groups; each frame references the image instance
/// it was derived from.
#[derive(Debug, Clone)]
pub struct DicomSegEncoder {
    manufacturer: String,
    software_version: String,
}

impl Default for DicomSegEncoder {
    fn default() -> Self {
        Self {
            manufacturer: env!("CARGO_PKG_NAME").to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl DicomSegEncoder {
    /// Creates a new DicomSegEncoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: Set the Manufacturer written in the SEG objects
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }
}

/// One encoded frame
struct Frame {
    segment_number: u16,
    slice: usize,
}

impl SegEncoder for DicomSegEncoder {
    fn encode_seg(&self, request: &SegEncodeRequest<'_>) -> Result<Vec<u8>> {
        let volume = request.volume;
        let series = request.series;
        if volume.geometry.size != series.geometry.size {
            return Err(DicomSegError::Encode(format!(
                "volume grid {} does not match series {} grid {}",
                volume.geometry, series.series_instance_uid, series.geometry
            )));
        }
        if request.segments.is_empty() {
            return Err(DicomSegError::Encode("no segment to encode".to_string()));
        }

        let [columns, rows, depth] = volume.geometry.size;
        let rows_us = u16::try_from(rows)
            .map_err(|_| DicomSegError::Encode(format!("{} rows exceed the DICOM limit", rows)))?;
        let columns_us = u16::try_from(columns).map_err(|_| {
            DicomSegError::Encode(format!("{} columns exceed the DICOM limit", columns))
        })?;

        let mut frames = Vec::new();
        let mut bits = BitWriter::default();
        for (index, segment) in request.segments.iter().enumerate() {
            let segment_number = u16::try_from(index + 1)
                .map_err(|_| DicomSegError::Encode("too many segments".to_string()))?;
            let label = segment.label_id;
            for z in 0..depth {
                let slice = volume.data.index_axis(ndarray::Axis(0), z);
                if request.options.skip_empty_slices && !slice.iter().any(|&v| v == label) {
                    continue;
                }
                // Row-major, column index fastest
                for &value in slice.iter() {
                    bits.push(value == label);
                }
                frames.push(Frame {
                    segment_number,
                    slice: z,
                });
            }
        }
        if frames.is_empty() {
            return Err(DicomSegError::Encode(
                "no frame holds a labelled voxel".to_string(),
            ));
        }
        debug!(
            "Encoding {} frames of {}x{} for {} segments",
            frames.len(),
            columns,
            rows,
            request.segments.len()
        );

        let sop_instance_uid = new_uid();
        let now = chrono::Local::now();
        let date = now.format("%Y%m%d").to_string();
        let time = now.format("%H%M%S").to_string();
        let metadata = request.metadata;

        let mut dcm = InMemDicomObject::new_empty();
        put_str(&mut dcm, SPECIFIC_CHARACTER_SET, VR::CS, "ISO_IR 192");
        put_strs(&mut dcm, IMAGE_TYPE, VR::CS, &["DERIVED", "PRIMARY"]);
        put_str(&mut dcm, SOP_CLASS_UID, VR::UI, SEGMENTATION_STORAGE);
        put_str(&mut dcm, SOP_INSTANCE_UID, VR::UI, &sop_instance_uid);
        put_str(&mut dcm, INSTANCE_CREATION_DATE, VR::DA, &date);
        put_str(&mut dcm, INSTANCE_CREATION_TIME, VR::TM, &time);
        put_str(&mut dcm, SERIES_DATE, VR::DA, &date);
        put_str(&mut dcm, SERIES_TIME, VR::TM, &time);
        put_str(&mut dcm, CONTENT_DATE, VR::DA, &date);
        put_str(&mut dcm, CONTENT_TIME, VR::TM, &time);
        put_str(&mut dcm, MODALITY, VR::CS, "SEG");

        // Patient and study attributes follow the referenced series
        put_opt(&mut dcm, PATIENT_NAME, VR::PN, &series.patient_name);
        put_opt(&mut dcm, PATIENT_ID, VR::LO, &series.patient_id);
        put_opt(&mut dcm, PATIENT_BIRTH_DATE, VR::DA, &series.patient_birth_date);
        put_opt(&mut dcm, PATIENT_SEX, VR::CS, &series.patient_sex);
        put_opt(&mut dcm, STUDY_DATE, VR::DA, &series.study_date);
        put_opt(&mut dcm, STUDY_TIME, VR::TM, &series.study_time);
        put_opt(&mut dcm, STUDY_ID, VR::SH, &series.study_id);
        put_opt(&mut dcm, ACCESSION_NUMBER, VR::SH, &series.accession_number);
        put_opt(
            &mut dcm,
            REFERRING_PHYSICIAN_NAME,
            VR::PN,
            &series.referring_physician_name,
        );
        let study_instance_uid = series.study_instance_uid.clone().unwrap_or_else(|| {
            warn!(
                "Series {} has no Study Instance UID, generating one",
                series.series_instance_uid
            );
            new_uid()
        });
        put_str(&mut dcm, STUDY_INSTANCE_UID, VR::UI, &study_instance_uid);
        let frame_of_reference_uid = series.frame_of_reference_uid.clone().unwrap_or_else(|| {
            warn!(
                "Series {} has no Frame of Reference UID, generating one",
                series.series_instance_uid
            );
            new_uid()
        });
        put_str(&mut dcm, FRAME_OF_REFERENCE_UID, VR::UI, &frame_of_reference_uid);
        put_str(&mut dcm, POSITION_REFERENCE_INDICATOR, VR::LO, "");

        // Series and content attributes come from the metadata document
        put_str(&mut dcm, SERIES_INSTANCE_UID, VR::UI, &new_uid());
        put_str(
            &mut dcm,
            SERIES_NUMBER,
            VR::IS,
            metadata.series_number.as_deref().unwrap_or(DEFAULT_SERIES_NUMBER),
        );
        put_str(
            &mut dcm,
            INSTANCE_NUMBER,
            VR::IS,
            metadata
                .instance_number
                .as_deref()
                .unwrap_or(DEFAULT_INSTANCE_NUMBER),
        );
        put_str(
            &mut dcm,
            SERIES_DESCRIPTION,
            VR::LO,
            metadata
                .series_description
                .as_deref()
                .unwrap_or(DEFAULT_SERIES_DESCRIPTION),
        );
        put_opt(
            &mut dcm,
            CLINICAL_TRIAL_SERIES_ID,
            VR::LO,
            &metadata.clinical_trial_series_id,
        );
        put_opt(
            &mut dcm,
            CLINICAL_TRIAL_TIME_POINT_ID,
            VR::LO,
            &metadata.clinical_trial_time_point_id,
        );
        if let Some(body_part) = &metadata.body_part_examined {
            put_str(&mut dcm, BODY_PART_EXAMINED, VR::CS, body_part);
        }
        put_str(
            &mut dcm,
            CONTENT_LABEL,
            VR::CS,
            metadata.content_label.as_deref().unwrap_or(DEFAULT_CONTENT_LABEL),
        );
        put_opt(
            &mut dcm,
            CONTENT_DESCRIPTION,
            VR::LO,
            &metadata.content_description,
        );
        put_opt(
            &mut dcm,
            CONTENT_CREATOR_NAME,
            VR::PN,
            &metadata.content_creator_name,
        );

        put_str(&mut dcm, MANUFACTURER, VR::LO, &self.manufacturer);
        put_str(&mut dcm, MANUFACTURER_MODEL_NAME, VR::LO, env!("CARGO_PKG_NAME"));
        put_str(&mut dcm, SOFTWARE_VERSIONS, VR::LO, &self.software_version);
        put_str(&mut dcm, DEVICE_SERIAL_NUMBER, VR::LO, "1");

        // Image pixel
        dcm.put(DataElement::new(SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)));
        put_str(&mut dcm, PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
        dcm.put(DataElement::new(ROWS, VR::US, PrimitiveValue::from(rows_us)));
        dcm.put(DataElement::new(COLUMNS, VR::US, PrimitiveValue::from(columns_us)));
        dcm.put(DataElement::new(BITS_ALLOCATED, VR::US, PrimitiveValue::from(1_u16)));
        dcm.put(DataElement::new(BITS_STORED, VR::US, PrimitiveValue::from(1_u16)));
        dcm.put(DataElement::new(HIGH_BIT, VR::US, PrimitiveValue::from(0_u16)));
        dcm.put(DataElement::new(PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)));
        put_str(&mut dcm, LOSSY_IMAGE_COMPRESSION, VR::CS, "00");
        put_str(&mut dcm, SEGMENTATION_TYPE, VR::CS, "BINARY");
        put_str(&mut dcm, NUMBER_OF_FRAMES, VR::IS, &frames.len().to_string());

        put_sequence(
            &mut dcm,
            SEGMENT_SEQUENCE,
            request
                .segments
                .iter()
                .enumerate()
                .map(|(index, segment)| segment_item(index as u16 + 1, segment, &self.manufacturer))
                .collect(),
        );
        put_sequence(&mut dcm, REFERENCED_SERIES_SEQUENCE, vec![referenced_series_item(series)]);

        let dimension_organization_uid = new_uid();
        put_sequence(
            &mut dcm,
            DIMENSION_ORGANIZATION_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([DataElement::new(
                DIMENSION_ORGANIZATION_UID,
                VR::UI,
                PrimitiveValue::from(dimension_organization_uid.as_str()),
            )])],
        );
        put_sequence(
            &mut dcm,
            DIMENSION_INDEX_SEQUENCE,
            vec![
                dimension_index_item(
                    &dimension_organization_uid,
                    REFERENCED_SEGMENT_NUMBER,
                    SEGMENT_IDENTIFICATION_SEQUENCE,
                ),
                dimension_index_item(
                    &dimension_organization_uid,
                    IMAGE_POSITION_PATIENT,
                    PLANE_POSITION_SEQUENCE,
                ),
            ],
        );

        put_sequence(
            &mut dcm,
            SHARED_FUNCTIONAL_GROUPS_SEQUENCE,
            vec![shared_functional_groups(&volume.geometry)],
        );
        if series.instances.len() != depth {
            warn!(
                "Series {} has {} instances for {} slices, frames will not reference source images",
                series.series_instance_uid,
                series.instances.len(),
                depth
            );
        }
        put_sequence(
            &mut dcm,
            PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE,
            frames
                .iter()
                .map(|frame| per_frame_functional_groups(frame, volume, series, depth))
                .collect(),
        );

        dcm.put(DataElement::new(
            PIXEL_DATA,
            VR::OB,
            PrimitiveValue::from(bits.into_bytes()),
        ));

        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(SEGMENTATION_STORAGE)
            .media_storage_sop_instance_uid(sop_instance_uid.as_str());
        let file = dcm.with_meta(meta)?;
        let mut bytes = Vec::new();
        file.write_all(&mut bytes)
            .map_err(|e| DicomSegError::Encode(e.to_string()))?;
        Ok(bytes)
    }
}

/// Packs binary pixels LSB first, frames back to back without padding
#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    len: usize,
}

impl BitWriter {
    fn push(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= 1 << (self.len % 8);
            }
        }
        self.len += 1;
    }

    /// Packed bytes, padded to an even length
    fn into_bytes(mut self) -> Vec<u8> {
        if self.bytes.len() % 2 == 1 {
            self.bytes.push(0);
        }
        self.bytes
    }
}

/// New UID under the UUID-derived `2.25` root
fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Formats a decimal string (DS) value, at most 16 characters
fn ds_string(value: f64) -> String {
    let plain = value.to_string();
    if plain.len() <= 16 {
        return plain;
    }
    for precision in (0..=12).rev() {
        let rounded = format!("{:.*}", precision, value);
        if rounded.len() <= 16 {
            return rounded;
        }
    }
    format!("{:.6e}", value)
}

fn put_str(dcm: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    dcm.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn put_strs(dcm: &mut InMemDicomObject, tag: Tag, vr: VR, values: &[&str]) {
    let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    dcm.put(DataElement::new(tag, vr, PrimitiveValue::Strs(values.into())));
}

/// Type 2 attribute: written empty when unknown
fn put_opt(dcm: &mut InMemDicomObject, tag: Tag, vr: VR, value: &Option<String>) {
    put_str(dcm, tag, vr, value.as_deref().unwrap_or(""));
}

fn put_ds(dcm: &mut InMemDicomObject, tag: Tag, values: &[f64]) {
    let values: Vec<String> = values.iter().map(|v| ds_string(*v)).collect();
    dcm.put(DataElement::new(tag, VR::DS, PrimitiveValue::Strs(values.into())));
}

fn put_sequence(dcm: &mut InMemDicomObject, tag: Tag, items: Vec<InMemDicomObject>) {
    dcm.put(DataElement::new(tag, VR::SQ, DataSetSequence::from(items)));
}

fn code_item(code: &CodedConcept) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        DataElement::new(CODE_VALUE, VR::SH, PrimitiveValue::from(code.code_value.as_str())),
        DataElement::new(
            CODING_SCHEME_DESIGNATOR,
            VR::SH,
            PrimitiveValue::from(code.coding_scheme_designator.as_str()),
        ),
        DataElement::new(
            CODE_MEANING,
            VR::LO,
            PrimitiveValue::from(code.code_meaning.as_str()),
        ),
    ])
}

fn dcm_code(value: &str, meaning: &str) -> InMemDicomObject {
    code_item(&CodedConcept {
        code_value: value.to_string(),
        coding_scheme_designator: "DCM".to_string(),
        code_meaning: meaning.to_string(),
    })
}

fn segment_item(number: u16, segment: &SegmentDescriptor, algorithm: &str) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    item.put(DataElement::new(SEGMENT_NUMBER, VR::US, PrimitiveValue::from(number)));
    put_str(&mut item, SEGMENT_LABEL, VR::LO, segment.label());
    put_str(&mut item, SEGMENT_DESCRIPTION, VR::ST, &segment.segment_description);
    put_str(
        &mut item,
        SEGMENT_ALGORITHM_TYPE,
        VR::CS,
        &segment.segment_algorithm_type,
    );
    // Required unless the segment was drawn manually
    match &segment.segment_algorithm_name {
        Some(name) => put_str(&mut item, SEGMENT_ALGORITHM_NAME, VR::LO, name),
        None if !segment.segment_algorithm_type.eq_ignore_ascii_case("MANUAL") => {
            put_str(&mut item, SEGMENT_ALGORITHM_NAME, VR::LO, algorithm)
        }
        None => {}
    }
    put_sequence(
        &mut item,
        SEGMENTED_PROPERTY_CATEGORY_CODE_SEQUENCE,
        vec![code_item(&segment.segmented_property_category_code_sequence)],
    );
    let mut property_type = code_item(&segment.segmented_property_type_code_sequence);
    if let Some(modifier) = &segment.segmented_property_type_modifier_code_sequence {
        put_sequence(
            &mut property_type,
            SEGMENTED_PROPERTY_TYPE_MODIFIER_CODE_SEQUENCE,
            vec![code_item(modifier)],
        );
    }
    put_sequence(
        &mut item,
        SEGMENTED_PROPERTY_TYPE_CODE_SEQUENCE,
        vec![property_type],
    );
    if let Some(region) = &segment.anatomic_region_sequence {
        put_sequence(&mut item, ANATOMIC_REGION_SEQUENCE, vec![code_item(region)]);
    }
    if let Some(rgb) = segment.recommended_display_rgb_value {
        item.put(DataElement::new(
            RECOMMENDED_DISPLAY_CIELAB_VALUE,
            VR::US,
            PrimitiveValue::U16(srgb_to_dicom_lab(rgb).to_vec().into()),
        ));
    }
    item
}

fn referenced_series_item(series: &ImageSeries) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    put_str(
        &mut item,
        SERIES_INSTANCE_UID,
        VR::UI,
        &series.series_instance_uid,
    );
    if !series.instances.is_empty() {
        put_sequence(
            &mut item,
            REFERENCED_INSTANCE_SEQUENCE,
            series
                .instances
                .iter()
                .map(|instance| {
                    InMemDicomObject::from_element_iter([
                        DataElement::new(
                            REFERENCED_SOP_CLASS_UID,
                            VR::UI,
                            PrimitiveValue::from(instance.sop_class_uid.as_str()),
                        ),
                        DataElement::new(
                            REFERENCED_SOP_INSTANCE_UID,
                            VR::UI,
                            PrimitiveValue::from(instance.sop_instance_uid.as_str()),
                        ),
                    ])
                })
                .collect(),
        );
    }
    item
}

fn dimension_index_item(organization_uid: &str, pointer: Tag, group: Tag) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        DataElement::new(
            DIMENSION_ORGANIZATION_UID,
            VR::UI,
            PrimitiveValue::from(organization_uid),
        ),
        DataElement::new(
            DIMENSION_INDEX_POINTER,
            VR::AT,
            PrimitiveValue::Tags(vec![pointer].into()),
        ),
        DataElement::new(
            FUNCTIONAL_GROUP_POINTER,
            VR::AT,
            PrimitiveValue::Tags(vec![group].into()),
        ),
    ])
}

fn shared_functional_groups(geometry: &Geometry) -> InMemDicomObject {
    let d = &geometry.direction;
    let mut orientation = InMemDicomObject::new_empty();
    put_ds(
        &mut orientation,
        IMAGE_ORIENTATION_PATIENT,
        &[d[0][0], d[1][0], d[2][0], d[0][1], d[1][1], d[2][1]],
    );

    // Pixel Spacing is (row spacing, column spacing), i.e. (y, x)
    let mut measures = InMemDicomObject::new_empty();
    put_ds(
        &mut measures,
        PIXEL_SPACING,
        &[geometry.spacing[1], geometry.spacing[0]],
    );
    put_ds(&mut measures, SLICE_THICKNESS, &[geometry.spacing[2]]);
    put_ds(&mut measures, SPACING_BETWEEN_SLICES, &[geometry.spacing[2]]);

    let mut groups = InMemDicomObject::new_empty();
    put_sequence(&mut groups, PLANE_ORIENTATION_SEQUENCE, vec![orientation]);
    put_sequence(&mut groups, PIXEL_MEASURES_SEQUENCE, vec![measures]);
    groups
}

fn per_frame_functional_groups(
    frame: &Frame,
    volume: &LabelVolume,
    series: &ImageSeries,
    depth: usize,
) -> InMemDicomObject {
    let mut groups = InMemDicomObject::new_empty();

    if series.instances.len() == depth {
        if let Some(source) = series.instances.get(frame.slice) {
            let mut source_item = InMemDicomObject::from_element_iter([
                DataElement::new(
                    REFERENCED_SOP_CLASS_UID,
                    VR::UI,
                    PrimitiveValue::from(source.sop_class_uid.as_str()),
                ),
                DataElement::new(
                    REFERENCED_SOP_INSTANCE_UID,
                    VR::UI,
                    PrimitiveValue::from(source.sop_instance_uid.as_str()),
                ),
            ]);
            put_sequence(
                &mut source_item,
                PURPOSE_OF_REFERENCE_CODE_SEQUENCE,
                vec![dcm_code(
                    "121322",
                    "Source image for image processing operation",
                )],
            );
            let mut derivation = InMemDicomObject::new_empty();
            put_sequence(
                &mut derivation,
                DERIVATION_CODE_SEQUENCE,
                vec![dcm_code("113076", "Segmentation")],
            );
            put_sequence(&mut derivation, SOURCE_IMAGE_SEQUENCE, vec![source_item]);
            put_sequence(&mut groups, DERIVATION_IMAGE_SEQUENCE, vec![derivation]);
        }
    }

    let frame_content = InMemDicomObject::from_element_iter([DataElement::new(
        DIMENSION_INDEX_VALUES,
        VR::UL,
        PrimitiveValue::U32(vec![frame.segment_number as u32, frame.slice as u32 + 1].into()),
    )]);
    put_sequence(&mut groups, FRAME_CONTENT_SEQUENCE, vec![frame_content]);

    let mut position = InMemDicomObject::new_empty();
    put_ds(
        &mut position,
        IMAGE_POSITION_PATIENT,
        &volume
            .geometry
            .index_to_physical([0.0, 0.0, frame.slice as f64]),
    );
    put_sequence(&mut groups, PLANE_POSITION_SEQUENCE, vec![position]);

    let identification = InMemDicomObject::from_element_iter([DataElement::new(
        REFERENCED_SEGMENT_NUMBER,
        VR::US,
        PrimitiveValue::from(frame.segment_number),
    )]);
    put_sequence(
        &mut groups,
        SEGMENT_IDENTIFICATION_SEQUENCE,
        vec![identification],
    );
    groups
}

/// Converts sRGB to the scaled CIELab encoding of DICOM (D65 white point)
///
/// L* 0..100 and a*, b* -128..127 are mapped linearly onto 0..65535.
fn srgb_to_dicom_lab(rgb: [u8; 3]) -> [u16; 3] {
    let linear = rgb.map(|c| {
        let c = c as f64 / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    });
    let [r, g, b] = linear;
    let x = (0.4124 * r + 0.3576 * g + 0.1805 * b) / 0.95047;
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let z = (0.0193 * r + 0.1192 * g + 0.9505 * b) / 1.08883;

    let f = |t: f64| {
        if t > 0.008856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    };
    let (fx, fy, fz) = (f(x), f(y), f(z));
    let l = 116.0 * fy - 16.0;
    let a = 500.0 * (fx - fy);
    let b = 200.0 * (fy - fz);

    let scale = |v: f64, min: f64, max: f64| {
        ((v - min) / (max - min) * 65535.0).round().clamp(0.0, 65535.0) as u16
    };
    [
        scale(l, 0.0, 100.0),
        scale(a, -128.0, 127.0),
        scale(b, -128.0, 127.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderOptions;
    use crate::metadata::tests::LIVER_METAINFO;
    use crate::metadata::SegMetadataSpec;
    use crate::series::SeriesInstance;
    use crate::tags::{get_int_value, get_string_value};
    use dicom_object::open_file;
    use ndarray::array;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use dicom_dictionary_std::uids::CT_IMAGE_STORAGE;

    fn series() -> ImageSeries {
        let geometry = Geometry::axis_aligned([-10.0, -20.0, 5.0], [0.75, 0.5, 2.5], [3, 2, 2]);
        let mut series = ImageSeries::new("1.2.3.1", geometry).with_description("CT");
        series.study_instance_uid = Some("1.2.3".to_string());
        series.frame_of_reference_uid = Some("1.2.3.0".to_string());
        series.patient_id = Some("P1".to_string());
        series.instances = (1..=2)
            .map(|n| SeriesInstance {
                path: PathBuf::from(format!("IM{}.dcm", n)),
                sop_class_uid: CT_IMAGE_STORAGE.to_string(),
                sop_instance_uid: format!("1.2.3.1.{}", n),
            })
            .collect();
        series
    }

    fn volume(series: &ImageSeries) -> LabelVolume {
        // Label 1 only on the first slice, label 2 on both
        let data = array![
            [[1, 1, 0], [0, 2, 0]],
            [[0, 0, 0], [2, 2, 2]]
        ];
        LabelVolume::new(data, series.geometry).unwrap()
    }

    fn encode(skip_empty_slices: bool) -> dicom_object::DefaultDicomObject {
        let series = series();
        let volume = volume(&series);
        let metadata = SegMetadataSpec::from_json_str(LIVER_METAINFO).unwrap();
        let request = SegEncodeRequest {
            volume: &volume,
            series: &series,
            segments: metadata.descriptors().collect(),
            metadata: &metadata,
            options: EncoderOptions {
                skip_empty_slices,
                skip_missing_segment: false,
            },
        };
        let bytes = DicomSegEncoder::new().encode_seg(&request).unwrap();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.SEG.dcm");
        std::fs::write(&path, bytes).unwrap();
        open_file(&path).unwrap()
    }

    fn bit(bytes: &[u8], index: usize) -> bool {
        bytes[index / 8] & (1 << (index % 8)) != 0
    }

    #[test]
    fn test_encode_writes_segmentation_object() {
        let dcm = encode(false);

        assert_eq!(get_string_value(&dcm, SOP_CLASS_UID).unwrap(), SEGMENTATION_STORAGE);
        assert_eq!(get_string_value(&dcm, MODALITY).unwrap(), "SEG");
        assert_eq!(get_string_value(&dcm, SEGMENTATION_TYPE).unwrap(), "BINARY");
        assert_eq!(get_string_value(&dcm, PATIENT_ID).unwrap(), "P1");
        assert_eq!(get_string_value(&dcm, STUDY_INSTANCE_UID).unwrap(), "1.2.3");
        assert_eq!(get_string_value(&dcm, FRAME_OF_REFERENCE_UID).unwrap(), "1.2.3.0");
        assert_eq!(get_string_value(&dcm, SERIES_NUMBER).unwrap(), "300");
        assert_eq!(get_string_value(&dcm, CONTENT_CREATOR_NAME).unwrap(), "Reader1");
        assert!(get_string_value(&dcm, SERIES_INSTANCE_UID)
            .unwrap()
            .starts_with("2.25."));
        assert_eq!(get_int_value(&dcm, ROWS), Some(2));
        assert_eq!(get_int_value(&dcm, COLUMNS), Some(3));
        assert_eq!(get_int_value(&dcm, NUMBER_OF_FRAMES), Some(4));

        let segments = dcm.element(SEGMENT_SEQUENCE).unwrap().items().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(get_int_value(&segments[1], SEGMENT_NUMBER), Some(2));
        assert_eq!(get_string_value(&segments[1], SEGMENT_LABEL).unwrap(), "Lesion");
        assert!(segments[0].element(RECOMMENDED_DISPLAY_CIELAB_VALUE).is_ok());
        assert!(segments[1].element(RECOMMENDED_DISPLAY_CIELAB_VALUE).is_err());

        let referenced = dcm.element(REFERENCED_SERIES_SEQUENCE).unwrap().items().unwrap();
        assert_eq!(get_string_value(&referenced[0], SERIES_INSTANCE_UID).unwrap(), "1.2.3.1");
        let instances = referenced[0]
            .element(REFERENCED_INSTANCE_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(instances.len(), 2);
    }

    #[test]
    fn test_encode_packs_frames_by_segment_then_slice() {
        let dcm = encode(false);
        let pixels = dcm.element(PIXEL_DATA).unwrap().to_bytes().unwrap();

        // 4 frames of 6 pixels = 24 bits, padded to an even byte count
        assert_eq!(pixels.len(), 4);
        let frame_bits: Vec<Vec<bool>> = (0..4)
            .map(|f| (0..6).map(|i| bit(&pixels, f * 6 + i)).collect())
            .collect();
        assert_eq!(frame_bits[0], vec![true, true, false, false, false, false]);
        assert_eq!(frame_bits[1], vec![false; 6]);
        assert_eq!(frame_bits[2], vec![false, false, false, false, true, false]);
        assert_eq!(frame_bits[3], vec![false, false, false, true, true, true]);

        let frames = dcm
            .element(PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(frames.len(), 4);
        let content = frames[3]
            .element(FRAME_CONTENT_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        let indices: Vec<u32> = content[0]
            .element(DIMENSION_INDEX_VALUES)
            .unwrap()
            .to_multi_int::<u32>()
            .unwrap();
        assert_eq!(indices, vec![2, 2]);

        let position = frames[3]
            .element(PLANE_POSITION_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        let ipp = position[0]
            .element(IMAGE_POSITION_PATIENT)
            .unwrap()
            .to_multi_float64()
            .unwrap();
        assert_eq!(ipp, vec![-10.0, -20.0, 7.5]);

        let derivation = frames[3]
            .element(DERIVATION_IMAGE_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        let source = derivation[0]
            .element(SOURCE_IMAGE_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(
            get_string_value(&source[0], REFERENCED_SOP_INSTANCE_UID).unwrap(),
            "1.2.3.1.2"
        );
    }

    #[test]
    fn test_skip_empty_slices_drops_empty_frames() {
        let dcm = encode(true);
        assert_eq!(get_int_value(&dcm, NUMBER_OF_FRAMES), Some(3));
        let frames = dcm
            .element(PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(frames.len(), 3);
    }

    #[test]
    fn test_encode_rejects_grid_mismatch() {
        let series = series();
        let other = Geometry::axis_aligned([0.0; 3], [1.0; 3], [1, 1, 1]);
        let volume = LabelVolume::new(array![[[1]]], other).unwrap();
        let metadata = SegMetadataSpec::from_json_str(LIVER_METAINFO).unwrap();
        let request = SegEncodeRequest {
            volume: &volume,
            series: &series,
            segments: metadata.descriptors().collect(),
            metadata: &metadata,
            options: EncoderOptions::default(),
        };
        let result = DicomSegEncoder::new().encode_seg(&request);
        assert!(matches!(result, Err(DicomSegError::Encode(_))));
    }

    #[test]
    fn test_srgb_to_dicom_lab() {
        let white = srgb_to_dicom_lab([255, 255, 255]);
        assert!(white[0] > 65500);
        assert!((white[1] as i32 - 32896).abs() < 100);
        assert!((white[2] as i32 - 32896).abs() < 100);

        assert_eq!(srgb_to_dicom_lab([0, 0, 0]), [0, 32896, 32896]);
    }

    #[test]
    fn test_ds_string_fits_sixteen_characters() {
        assert_eq!(ds_string(2.5), "2.5");
        assert_eq!(ds_string(-0.75), "-0.75");
        assert!(ds_string(0.1 + 0.2).len() <= 16);
        assert!(ds_string(-123.456789012345678).len() <= 16);
    }
}
