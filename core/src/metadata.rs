use crate::error::{DicomSegError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Coded concept (Code Sequence Macro)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodedConcept {
    pub code_value: String,
    pub coding_scheme_designator: String,
    pub code_meaning: String,
}

/// Description of one segment, keyed by its label value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SegmentDescriptor {
    /// Label value in the label map
    #[serde(rename = "labelID")]
    pub label_id: u16,

    pub segment_description: String,

    #[serde(default)]
    pub segment_label: Option<String>,

    /// MANUAL, SEMIAUTOMATIC or AUTOMATIC
    pub segment_algorithm_type: String,

    #[serde(default)]
    pub segment_algorithm_name: Option<String>,

    pub segmented_property_category_code_sequence: CodedConcept,

    pub segmented_property_type_code_sequence: CodedConcept,

    #[serde(default)]
    pub segmented_property_type_modifier_code_sequence: Option<CodedConcept>,

    #[serde(default)]
    pub anatomic_region_sequence: Option<CodedConcept>,

    /// Display colour as sRGB, 0-255 per channel
    #[serde(default, rename = "recommendedDisplayRGBValue")]
    pub recommended_display_rgb_value: Option<[u8; 3]>,
}

impl SegmentDescriptor {
    /// Segment Label, falling back to the description
    pub fn label(&self) -> &str {
        self.segment_label
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.segment_description)
    }
}

/// dcmqi "metainfo" document describing the segments of a segmentation
///
/// The document is read once and shared read-only by every conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SegMetadataSpec {
    #[serde(default)]
    pub content_creator_name: Option<String>,

    #[serde(default, rename = "ClinicalTrialSeriesID")]
    pub clinical_trial_series_id: Option<String>,

    #[serde(default, rename = "ClinicalTrialTimePointID")]
    pub clinical_trial_time_point_id: Option<String>,

    #[serde(default)]
    pub series_description: Option<String>,

    #[serde(default, deserialize_with = "string_or_number")]
    pub series_number: Option<String>,

    #[serde(default, deserialize_with = "string_or_number")]
    pub instance_number: Option<String>,

    #[serde(default)]
    pub body_part_examined: Option<String>,

    #[serde(default)]
    pub content_label: Option<String>,

    #[serde(default)]
    pub content_description: Option<String>,

    /// Segment descriptors, grouped as dcmqi writes them
    #[serde(rename = "segmentAttributes")]
    pub segment_attributes: Vec<Vec<SegmentDescriptor>>,
}

/// Accepts `"300"` as well as `300`
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl SegMetadataSpec {
    /// Loads and validates a metainfo JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DicomSegError::Metadata(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
            .map_err(|e| DicomSegError::Metadata(format!("{}: {}", path.display(), e)))
    }

    /// Parses and validates a metainfo JSON document
    pub fn from_json_str(text: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks label values are non-zero and unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for descriptor in self.descriptors() {
            if descriptor.label_id == 0 {
                return Err(DicomSegError::Metadata(
                    "label 0 is reserved for background".to_string(),
                ));
            }
            if !seen.insert(descriptor.label_id) {
                return Err(DicomSegError::Metadata(format!(
                    "label {} is described more than once",
                    descriptor.label_id
                )));
            }
        }
        if seen.is_empty() {
            return Err(DicomSegError::Metadata(
                "no segment descriptor in segmentAttributes".to_string(),
            ));
        }
        Ok(())
    }

    /// Every descriptor, in document order
    pub fn descriptors(&self) -> impl Iterator<Item = &SegmentDescriptor> {
        self.segment_attributes.iter().flatten()
    }

    /// Descriptor of a label value
    pub fn descriptor_for(&self, label: u16) -> Option<&SegmentDescriptor> {
        self.descriptors().find(|d| d.label_id == label)
    }
}
