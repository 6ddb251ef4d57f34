//! Patient identifier inference from file and folder names
//!
//! Segmentation files carry the patient identifier in their name, optionally
//! preceded by a marker token (e.g. `Patient12_CT.nrrd`). [`extract`] is the
//! plain marker-based extraction; [`IdentifierMatcher`] makes the strategy
//! pluggable so stricter schemes can replace it.

mod matchers;

pub use matchers::{IdentifierMatcher, KnownIdMatcher, ManifestMatcher, PrefixMatcher, RegexMatcher};

use crate::error::{DicomSegError, Result};

/// Extracts the patient identifier that follows `prefix` in `filename`
///
/// Returns the run of ASCII letters and digits immediately following the
/// first case-sensitive occurrence of `prefix`. An empty prefix selects the
/// leading token of the name. The token is returned verbatim: `"042"` and
/// `"0042"` are different identifiers.
///
/// # Errors
///
/// Returns [`DicomSegError::IdentifierNotFound`] if the marker is absent or
/// is not followed by an alphanumeric character.
///
/// # Example
///
/// ```
/// use dicomseg_core::identifier::extract;
///
/// assert_eq!(extract("Patient12_CT.nrrd", "Patient").unwrap(), "12");
/// assert_eq!(extract("patient_042_PET.nii.gz", "patient_").unwrap(), "042");
/// assert_eq!(extract("P1_CT.nrrd", "").unwrap(), "P1");
/// assert!(extract("CT.nrrd", "Patient").is_err());
/// ```
pub fn extract(filename: &str, prefix: &str) -> Result<String> {
    let not_found = || DicomSegError::IdentifierNotFound {
        filename: filename.to_string(),
        prefix: prefix.to_string(),
    };

    let start = filename.find(prefix).ok_or_else(not_found)? + prefix.len();
    let token: String = filename[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();

    if token.is_empty() {
        Err(not_found())
    } else {
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Patient1_CT.nrrd", "Patient", "1")]
    #[case("Patient12.seg.nrrd", "Patient", "12")]
    #[case("PatientX_CT.nrrd", "Patient", "X")]
    #[case("patient_042_PET.nii.gz", "patient_", "042")]
    #[case("patient_0042_PET.nii.gz", "patient_", "0042")]
    #[case("study-Patient7-Patient9.nrrd", "Patient", "7")]
    #[case("P1_CT.nrrd", "", "P1")]
    fn test_extract(#[case] filename: &str, #[case] prefix: &str, #[case] expected: &str) {
        assert_eq!(extract(filename, prefix).unwrap(), expected);
    }

    #[rstest]
    #[case("CT.nrrd", "Patient")]
    #[case("Patient_CT.nrrd", "Patient")]
    #[case("Patient", "Patient")]
    #[case("patient1.nrrd", "Patient")]
    #[case("_CT.nrrd", "")]
    fn test_extract_not_found(#[case] filename: &str, #[case] prefix: &str) {
        assert!(matches!(
            extract(filename, prefix),
            Err(DicomSegError::IdentifierNotFound { .. })
        ));
    }

    #[test]
    fn test_extract_preserves_leading_zeros() {
        let seg = extract("patient_042_CT.nrrd", "patient_").unwrap();
        let dir_a = extract("patient_042", "patient_").unwrap();
        let dir_b = extract("patient_0042", "patient_").unwrap();

        assert_eq!(seg, dir_a);
        assert_ne!(seg, dir_b);
    }
}
