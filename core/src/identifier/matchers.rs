use super::extract;
use crate::error::{DicomSegError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Strategy turning a file or folder name into a patient identifier
pub trait IdentifierMatcher: Send + Sync {
    /// Returns the patient identifier carried by `filename`
    fn match_filename(&self, filename: &str) -> Result<String>;
}

/// Marker-based matching, see [`extract`]
#[derive(Debug, Clone, Default)]
pub struct PrefixMatcher {
    prefix: String,
}

impl PrefixMatcher {
    /// Creates a matcher for the given marker (may be empty)
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The marker preceding identifiers
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl IdentifierMatcher for PrefixMatcher {
    fn match_filename(&self, filename: &str) -> Result<String> {
        extract(filename, &self.prefix)
    }
}

/// Regex-based matching: the identifier is the first capture group
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    /// Compiles the pattern, which must contain a capture group
    ///
    /// # Example
    ///
    /// ```
    /// use dicomseg_core::identifier::{IdentifierMatcher, RegexMatcher};
    ///
    /// let matcher = RegexMatcher::new(r"^sub-(\d{3})_").unwrap();
    /// assert_eq!(matcher.match_filename("sub-007_seg.nii.gz").unwrap(), "007");
    /// assert!(RegexMatcher::new(r"^sub-\d+").is_err());
    /// ```
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| DicomSegError::Config(format!("invalid identifier regex: {}", e)))?;
        if regex.captures_len() < 2 {
            return Err(DicomSegError::Config(format!(
                "identifier regex '{}' has no capture group",
                pattern
            )));
        }
        Ok(Self { regex })
    }
}

impl IdentifierMatcher for RegexMatcher {
    fn match_filename(&self, filename: &str) -> Result<String> {
        self.regex
            .captures(filename)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DicomSegError::IdentifierNotFound {
                filename: filename.to_string(),
                prefix: self.regex.as_str().to_string(),
            })
    }
}

/// Exact lookup in a file name → identifier table
#[derive(Debug, Clone, Default)]
pub struct ManifestMatcher {
    entries: HashMap<String, String>,
}

impl ManifestMatcher {
    /// Creates a matcher from name/identifier pairs
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Loads a JSON object mapping file names to identifiers
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let entries: HashMap<String, String> = serde_json::from_str(&text)?;
        Ok(Self { entries })
    }
}

impl IdentifierMatcher for ManifestMatcher {
    fn match_filename(&self, filename: &str) -> Result<String> {
        self.entries
            .get(filename)
            .cloned()
            .ok_or_else(|| DicomSegError::IdentifierNotFound {
                filename: filename.to_string(),
                prefix: String::new(),
            })
    }
}

/// Matches against a closed set of known identifiers
///
/// An identifier matches when it occurs in the name and is not directly
/// followed by a digit, so `P1` matches `P1_CT.nrrd` but not `P10_CT.nrrd`.
#[derive(Debug, Clone, Default)]
pub struct KnownIdMatcher {
    identifiers: Vec<String>,
}

impl KnownIdMatcher {
    /// Creates a matcher for the given identifiers
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut identifiers: Vec<String> = identifiers
            .into_iter()
            .map(Into::into)
            .filter(|id| !id.is_empty())
            .collect();
        identifiers.sort();
        identifiers.dedup();
        Self { identifiers }
    }

    fn occurs_in(identifier: &str, filename: &str) -> bool {
        filename.match_indices(identifier).any(|(start, _)| {
            filename[start + identifier.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_digit())
        })
    }
}

impl IdentifierMatcher for KnownIdMatcher {
    fn match_filename(&self, filename: &str) -> Result<String> {
        let candidates: Vec<String> = self
            .identifiers
            .iter()
            .filter(|id| Self::occurs_in(id, filename))
            .cloned()
            .collect();

        match candidates.len() {
            0 => Err(DicomSegError::IdentifierNotFound {
                filename: filename.to_string(),
                prefix: String::new(),
            }),
            1 => Ok(candidates[0].clone()),
            _ => Err(DicomSegError::AmbiguousMatch {
                filename: filename.to_string(),
                identifier: candidates.join("|"),
                candidates,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_prefix_matcher() {
        let matcher = PrefixMatcher::new("Patient");
        assert_eq!(matcher.match_filename("Patient3_CT.nrrd").unwrap(), "3");
        assert!(matcher.match_filename("CT.nrrd").is_err());
    }

    #[test]
    fn test_regex_matcher_requires_capture() {
        assert!(RegexMatcher::new(r"(\d+").is_err());
        let matcher = RegexMatcher::new(r"_(\w+?)_seg").unwrap();
        assert_eq!(matcher.match_filename("lung_ABC12_seg.nii").unwrap(), "ABC12");
        assert!(matcher.match_filename("lung.nii").is_err());
    }

    #[test]
    fn test_manifest_matcher_from_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"liver_mask.nrrd": "HN-001"}}"#).unwrap();

        let matcher = ManifestMatcher::from_json_file(file.path()).unwrap();
        assert_eq!(matcher.match_filename("liver_mask.nrrd").unwrap(), "HN-001");
        assert!(matcher.match_filename("other.nrrd").is_err());
    }

    #[test]
    fn test_known_id_matcher_digit_boundary() {
        let matcher = KnownIdMatcher::new(["P1", "P10"]);
        assert_eq!(matcher.match_filename("P1_CT.nrrd").unwrap(), "P1");
        assert_eq!(matcher.match_filename("P10_CT.nrrd").unwrap(), "P10");
        assert_eq!(matcher.match_filename("seg_P1").unwrap(), "P1");
        assert!(matcher.match_filename("P2_CT.nrrd").is_err());
    }

    #[test]
    fn test_known_id_matcher_ambiguous() {
        let matcher = KnownIdMatcher::new(["A1", "B2"]);
        assert!(matches!(
            matcher.match_filename("A1_B2.nrrd"),
            Err(DicomSegError::AmbiguousMatch { .. })
        ));
    }
}
