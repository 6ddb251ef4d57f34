use dicom_core::Tag;
use dicom_object::InMemDicomObject;

// SOP Common
pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
pub const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
pub const IMAGE_TYPE: Tag = Tag(0x0008, 0x0008);
pub const INSTANCE_CREATION_DATE: Tag = Tag(0x0008, 0x0012);
pub const INSTANCE_CREATION_TIME: Tag = Tag(0x0008, 0x0013);
pub const SPECIFIC_CHARACTER_SET: Tag = Tag(0x0008, 0x0005);

// Patient Tags
pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
pub const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);
pub const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);

// Clinical Trial Tags
pub const CLINICAL_TRIAL_TIME_POINT_ID: Tag = Tag(0x0012, 0x0050);
pub const CLINICAL_TRIAL_SERIES_ID: Tag = Tag(0x0012, 0x0071);

// Study/Series Identification Tags
pub const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
pub const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
pub const STUDY_ID: Tag = Tag(0x0020, 0x0010);
pub const SERIES_NUMBER: Tag = Tag(0x0020, 0x0011);
pub const INSTANCE_NUMBER: Tag = Tag(0x0020, 0x0013);
pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
pub const SERIES_DATE: Tag = Tag(0x0008, 0x0021);
pub const CONTENT_DATE: Tag = Tag(0x0008, 0x0023);
pub const STUDY_TIME: Tag = Tag(0x0008, 0x0030);
pub const SERIES_TIME: Tag = Tag(0x0008, 0x0031);
pub const CONTENT_TIME: Tag = Tag(0x0008, 0x0033);
pub const ACCESSION_NUMBER: Tag = Tag(0x0008, 0x0050);
pub const MODALITY: Tag = Tag(0x0008, 0x0060);
pub const REFERRING_PHYSICIAN_NAME: Tag = Tag(0x0008, 0x0090);
pub const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103E);
pub const BODY_PART_EXAMINED: Tag = Tag(0x0018, 0x0015);

// Device/Manufacturer Tags
pub const MANUFACTURER: Tag = Tag(0x0008, 0x0070);
pub const MANUFACTURER_MODEL_NAME: Tag = Tag(0x0008, 0x1090);
pub const DEVICE_SERIAL_NUMBER: Tag = Tag(0x0018, 0x1000);
pub const SOFTWARE_VERSIONS: Tag = Tag(0x0018, 0x1020);

// Image Geometry Tags
pub const SLICE_THICKNESS: Tag = Tag(0x0018, 0x0050);
pub const SPACING_BETWEEN_SLICES: Tag = Tag(0x0018, 0x0088);
pub const IMAGE_POSITION_PATIENT: Tag = Tag(0x0020, 0x0032);
pub const IMAGE_ORIENTATION_PATIENT: Tag = Tag(0x0020, 0x0037);
pub const FRAME_OF_REFERENCE_UID: Tag = Tag(0x0020, 0x0052);
pub const POSITION_REFERENCE_INDICATOR: Tag = Tag(0x0020, 0x1040);
pub const ROWS: Tag = Tag(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);

// Image Pixel Tags
pub const SAMPLES_PER_PIXEL: Tag = Tag(0x0028, 0x0002);
pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag(0x0028, 0x0004);
pub const NUMBER_OF_FRAMES: Tag = Tag(0x0028, 0x0008);
pub const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
pub const BITS_STORED: Tag = Tag(0x0028, 0x0101);
pub const HIGH_BIT: Tag = Tag(0x0028, 0x0102);
pub const PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
pub const LOSSY_IMAGE_COMPRESSION: Tag = Tag(0x0028, 0x2110);
pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

// Code Sequence Macro
pub const CODE_VALUE: Tag = Tag(0x0008, 0x0100);
pub const CODING_SCHEME_DESIGNATOR: Tag = Tag(0x0008, 0x0102);
pub const CODE_MEANING: Tag = Tag(0x0008, 0x0104);

// Reference Tags
pub const REFERENCED_SERIES_SEQUENCE: Tag = Tag(0x0008, 0x1115);
pub const REFERENCED_INSTANCE_SEQUENCE: Tag = Tag(0x0008, 0x114A);
pub const REFERENCED_SOP_CLASS_UID: Tag = Tag(0x0008, 0x1150);
pub const REFERENCED_SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x1155);
pub const SOURCE_IMAGE_SEQUENCE: Tag = Tag(0x0008, 0x2112);
pub const ANATOMIC_REGION_SEQUENCE: Tag = Tag(0x0008, 0x2218);
pub const DERIVATION_IMAGE_SEQUENCE: Tag = Tag(0x0008, 0x9124);
pub const DERIVATION_CODE_SEQUENCE: Tag = Tag(0x0008, 0x9215);
pub const PURPOSE_OF_REFERENCE_CODE_SEQUENCE: Tag = Tag(0x0040, 0xA170);

// Multi-frame Functional Groups
pub const SHARED_FUNCTIONAL_GROUPS_SEQUENCE: Tag = Tag(0x5200, 0x9229);
pub const PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE: Tag = Tag(0x5200, 0x9230);
pub const PIXEL_MEASURES_SEQUENCE: Tag = Tag(0x0028, 0x9110);
pub const FRAME_CONTENT_SEQUENCE: Tag = Tag(0x0020, 0x9111);
pub const PLANE_POSITION_SEQUENCE: Tag = Tag(0x0020, 0x9113);
pub const PLANE_ORIENTATION_SEQUENCE: Tag = Tag(0x0020, 0x9116);
pub const DIMENSION_INDEX_VALUES: Tag = Tag(0x0020, 0x9157);
pub const DIMENSION_ORGANIZATION_UID: Tag = Tag(0x0020, 0x9164);
pub const DIMENSION_INDEX_POINTER: Tag = Tag(0x0020, 0x9165);
pub const FUNCTIONAL_GROUP_POINTER: Tag = Tag(0x0020, 0x9167);
pub const DIMENSION_ORGANIZATION_SEQUENCE: Tag = Tag(0x0020, 0x9221);
pub const DIMENSION_INDEX_SEQUENCE: Tag = Tag(0x0020, 0x9222);

// Segmentation Tags
pub const SEGMENTATION_TYPE: Tag = Tag(0x0062, 0x0001);
pub const SEGMENT_SEQUENCE: Tag = Tag(0x0062, 0x0002);
pub const SEGMENTED_PROPERTY_CATEGORY_CODE_SEQUENCE: Tag = Tag(0x0062, 0x0003);
pub const SEGMENT_NUMBER: Tag = Tag(0x0062, 0x0004);
pub const SEGMENT_LABEL: Tag = Tag(0x0062, 0x0005);
pub const SEGMENT_DESCRIPTION: Tag = Tag(0x0062, 0x0006);
pub const SEGMENT_ALGORITHM_TYPE: Tag = Tag(0x0062, 0x0008);
pub const SEGMENT_ALGORITHM_NAME: Tag = Tag(0x0062, 0x0009);
pub const SEGMENT_IDENTIFICATION_SEQUENCE: Tag = Tag(0x0062, 0x000A);
pub const REFERENCED_SEGMENT_NUMBER: Tag = Tag(0x0062, 0x000B);
pub const RECOMMENDED_DISPLAY_CIELAB_VALUE: Tag = Tag(0x0062, 0x000D);
pub const SEGMENTED_PROPERTY_TYPE_CODE_SEQUENCE: Tag = Tag(0x0062, 0x000F);
pub const SEGMENTED_PROPERTY_TYPE_MODIFIER_CODE_SEQUENCE: Tag = Tag(0x0062, 0x0011);
pub const CONTENT_LABEL: Tag = Tag(0x0070, 0x0080);
pub const CONTENT_DESCRIPTION: Tag = Tag(0x0070, 0x0081);
pub const CONTENT_CREATOR_NAME: Tag = Tag(0x0070, 0x0084);

/// Helper to get string value from DICOM tag
///
/// Returns `None` if the tag is not present or cannot be converted to string
pub fn get_string_value(dcm: &InMemDicomObject, tag: Tag) -> Option<String> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_str().ok())
        .map(|s| s.trim().trim_end_matches('\0').to_string())
}

/// Like [`get_string_value`], but empty values count as absent
pub fn get_non_empty_string_value(dcm: &InMemDicomObject, tag: Tag) -> Option<String> {
    get_string_value(dcm, tag).filter(|s| !s.is_empty())
}

/// Helper to get integer value from DICOM tag
///
/// Returns `None` if the tag is not present or cannot be converted to i32
pub fn get_int_value(dcm: &InMemDicomObject, tag: Tag) -> Option<i32> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_int::<i32>().ok())
}

/// Helper to get u16 value from DICOM tag
///
/// Returns `None` if the tag is not present or cannot be converted to u16
pub fn get_u16_value(dcm: &InMemDicomObject, tag: Tag) -> Option<u16> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_int::<u16>().ok())
}

/// Helper to get a floating point value from DICOM tag
pub fn get_f64_value(dcm: &InMemDicomObject, tag: Tag) -> Option<f64> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_float64().ok())
}

/// Helper to get multi-valued floating point values (e.g. DS) from DICOM tag
///
/// Returns `None` if the tag is not present or holds fewer than `count` values
pub fn get_multi_f64_value(dcm: &InMemDicomObject, tag: Tag, count: usize) -> Option<Vec<f64>> {
    dcm.element(tag)
        .ok()
        .and_then(|elem| elem.to_multi_float64().ok())
        .filter(|values| values.len() >= count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::value::PrimitiveValue;
    use dicom_core::{DataElement, VR};

    #[test]
    fn test_tag_values() {
        assert_eq!(MODALITY, Tag(0x0008, 0x0060));
        assert_eq!(IMAGE_ORIENTATION_PATIENT, Tag(0x0020, 0x0037));
        assert_eq!(SEGMENT_SEQUENCE, Tag(0x0062, 0x0002));
        assert_eq!(PIXEL_DATA, Tag(0x7FE0, 0x0010));
    }

    #[test]
    fn test_get_multi_f64_value_from_decimal_strings() {
        let mut dcm = InMemDicomObject::new_empty();
        dcm.put(DataElement::new(
            PIXEL_SPACING,
            VR::DS,
            PrimitiveValue::Strs(vec!["0.5".to_string(), "0.75".to_string()].into()),
        ));

        assert_eq!(get_multi_f64_value(&dcm, PIXEL_SPACING, 2), Some(vec![0.5, 0.75]));
        assert_eq!(get_multi_f64_value(&dcm, PIXEL_SPACING, 3), None);
        assert_eq!(get_multi_f64_value(&dcm, IMAGE_POSITION_PATIENT, 3), None);
    }

    #[test]
    fn test_get_non_empty_string_value() {
        let mut dcm = InMemDicomObject::new_empty();
        dcm.put(DataElement::new(
            SERIES_DESCRIPTION,
            VR::LO,
            PrimitiveValue::from(" "),
        ));
        dcm.put(DataElement::new(MODALITY, VR::CS, PrimitiveValue::from("CT")));

        assert_eq!(get_string_value(&dcm, SERIES_DESCRIPTION), Some(String::new()));
        assert_eq!(get_non_empty_string_value(&dcm, SERIES_DESCRIPTION), None);
        assert_eq!(get_non_empty_string_value(&dcm, MODALITY), Some("CT".to_string()));
    }
}
