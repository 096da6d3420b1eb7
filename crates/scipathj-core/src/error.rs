//! Error kinds for the per-image pipeline stages.

use scipathj_types::GeometryError;
use thiserror::Error;

/// Errors from the injected [`crate::nucleus::NucleusDetector`]. Per-tile
/// failures are non-fatal (the adapter emits a warning and proceeds);
/// only whole-image failures propagate as [`CoreError::Detector`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectorError {
    #[error("nucleus detector failed for tile at ({x}, {y}): {message}")]
    Tile { x: u32, y: u32, message: String },

    #[error("nucleus detector failed for the whole image: {0}")]
    WholeImage(String),
}

/// Classifier model artifact failed a structural check at load time.
/// Per-ROI inference itself never fails.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelFormatError {
    #[error("model artifact at {path} is truncated or has an invalid header")]
    InvalidHeader { path: String },

    #[error("model declares {declared} classes but tree {tree_index} targets class {target}")]
    ClassIndexOutOfRange {
        declared: usize,
        tree_index: usize,
        target: usize,
    },

    #[error("model feature mapping has no entry for index {index}")]
    MissingFeatureMapping { index: usize },

    #[error("tree {tree_index} node index {node_index} is out of bounds ({node_count} nodes)")]
    NodeIndexOutOfRange {
        tree_index: usize,
        node_index: usize,
        node_count: usize,
    },
}

/// Umbrella error for the per-image computation stages.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("stain matrix is singular or ill-conditioned (condition number {condition:.3e})")]
    StainMatrixSingular { condition: f64 },

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    ModelFormat(#[from] ModelFormatError),

    #[error("image has {found} channels, color deconvolution requires 3 (RGB)")]
    WrongChannelCount { found: u8 },
}
