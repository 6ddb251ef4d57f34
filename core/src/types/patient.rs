use crate::error::Result;
use crate::fs_utils::list_dirs;
use crate::identifier::IdentifierMatcher;
use std::path::{Path, PathBuf};

/// A patient folder discovered under the patients root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatientRecord {
    /// Identifier used to match segmentation files
    pub identifier: String,

    /// Path to the patient folder
    pub path: PathBuf,
}

impl PatientRecord {
    /// Creates a new PatientRecord
    pub fn new(identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            path: path.into(),
        }
    }

    /// Name of the patient folder
    pub fn folder_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Scans the patients root for patient folders
    ///
    /// The identifier of each folder is what `matcher` extracts from the
    /// folder name, or the whole folder name when the matcher finds nothing.
    /// Hidden folders are skipped; records are sorted by folder name.
    pub fn scan(patients_root: &Path, matcher: &dyn IdentifierMatcher) -> Result<Vec<Self>> {
        let records = list_dirs(patients_root)?
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                let identifier = matcher.match_filename(&name).unwrap_or(name);
                Some(Self::new(identifier, path))
            })
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::PrefixMatcher;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_extracts_identifiers() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("patient_042")).unwrap();
        fs::create_dir(temp_dir.path().join("patient_0042")).unwrap();
        fs::create_dir(temp_dir.path().join("other")).unwrap();
        fs::create_dir(temp_dir.path().join(".cache")).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"").unwrap();

        let records = PatientRecord::scan(temp_dir.path(), &PrefixMatcher::new("patient_")).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.identifier.as_str()).collect();

        assert_eq!(ids, vec!["other", "0042", "042"]);
        assert_eq!(records[2].folder_name(), "patient_042");
    }
}
