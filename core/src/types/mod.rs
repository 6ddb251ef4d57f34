//! Core data types of the conversion pipeline
//!
//! - [`Geometry`]: sampling grid of a volume in patient coordinates
//! - [`LabelVolume`]: segmentation label map on a grid
//! - [`LayoutCategory`]: raw arrangement of a patients folder
//! - [`PatientRecord`]: one patient folder and its identifier

mod category;
mod geometry;
mod patient;
mod volume;

pub use category::LayoutCategory;
pub use geometry::{cross, dot, invert, mat_vec, Geometry, Matrix3, GEOMETRY_TOLERANCE, IDENTITY};
pub use patient::PatientRecord;
pub use volume::LabelVolume;
