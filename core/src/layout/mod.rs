//! Patients folder layouts
//!
//! [`LayoutClassifier`] recognises how a data folder is organised and
//! [`FolderStructurer`] moves it into (and back out of) the canonical
//! per-patient layout, recording every move in a [`StructureManifest`].

mod classifier;
mod manifest;
mod structurer;

pub use crate::types::LayoutCategory;
pub use classifier::LayoutClassifier;
pub use manifest::{MoveKind, RecordedMove, StructureManifest, MANIFEST_FILE_NAME};
pub use structurer::{FileFailure, FolderStructurer, StructureReport};
