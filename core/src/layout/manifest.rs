use crate::error::Result;
use crate::fs_utils::write_durably;
use crate::types::LayoutCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the manifest, stored in the patients folder
pub const MANIFEST_FILE_NAME: &str = ".dicomseg-structure.json";

/// Kind of file a recorded move concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveKind {
    /// A patient image file; `original` is relative to the patients folder
    Image,
    /// A pooled segmentation file; `original` is relative to the pooled folder
    Segmentation,
}

/// One move performed while structuring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMove {
    pub kind: MoveKind,
    pub original: PathBuf,
    /// Location after structuring, relative to the patients folder
    pub structured: PathBuf,
}

/// Record of a `structure` run, read back by `destructure`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureManifest {
    /// Layout the patients folder had before the first `structure`
    pub category: LayoutCategory,

    /// Pooled segmentations folder, if the layout had one
    pub segmentations_folder: Option<PathBuf>,

    /// Moves in the order they were performed
    pub moves: Vec<RecordedMove>,
}

impl StructureManifest {
    /// Creates an empty manifest
    pub fn new(category: LayoutCategory, segmentations_folder: Option<PathBuf>) -> Self {
        Self {
            category,
            segmentations_folder,
            moves: Vec::new(),
        }
    }

    /// Path of the manifest for a patients folder
    pub fn path(patients_root: &Path) -> PathBuf {
        patients_root.join(MANIFEST_FILE_NAME)
    }

    /// Loads the manifest of a patients folder, if any
    pub fn load(patients_root: &Path) -> Result<Option<Self>> {
        let path = Self::path(patients_root);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Loads the existing manifest or starts a new one
    ///
    /// An existing manifest keeps the category it was created with, so
    /// re-running `structure` on an already canonical tree does not forget
    /// the original layout.
    pub fn load_or_new(
        patients_root: &Path,
        category: LayoutCategory,
        segmentations_folder: Option<PathBuf>,
    ) -> Result<Self> {
        Ok(Self::load(patients_root)?
            .unwrap_or_else(|| Self::new(category, segmentations_folder)))
    }

    /// Writes the manifest into the patients folder
    pub fn save(&self, patients_root: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_durably(&Self::path(patients_root), &json)?;
        Ok(())
    }

    /// Deletes the manifest of a patients folder
    pub fn remove(patients_root: &Path) -> Result<()> {
        let path = Self::path(patients_root);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Appends a move
    pub fn record(&mut self, kind: MoveKind, original: PathBuf, structured: PathBuf) {
        self.moves.push(RecordedMove {
            kind,
            original,
            structured,
        });
    }

    /// Index of the moves by structured location
    pub fn by_structured_path(&self) -> HashMap<&Path, &RecordedMove> {
        self.moves
            .iter()
            .map(|m| (m.structured.as_path(), m))
            .collect()
    }
}
