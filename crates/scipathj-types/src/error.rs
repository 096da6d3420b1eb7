//! Error kinds for the shared data model.

use thiserror::Error;

/// Polygon/ROI invariant violations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("polygon needs at least 3 distinct vertices, found {found}")]
    TooFewVertices { found: usize },

    #[error("geometry extends outside the image bounds")]
    OutOfBounds,

    #[error("cell {cell_id} links to nucleus roi {nucleus_id} which does not exist")]
    DanglingNucleusLink { cell_id: u64, nucleus_id: u64 },

    #[error("cell {cell_id} links to cytoplasm roi {cytoplasm_id} which does not exist")]
    DanglingCytoplasmLink { cell_id: u64, cytoplasm_id: u64 },

    #[error("cell {cell_id} geometry does not contain its nucleus centroid")]
    NucleusCentroidOutsideCell { cell_id: u64 },

    #[error("vessel roi {a} and {b} overlap by {overlap_fraction:.4}, exceeding tolerance")]
    VesselOverlap {
        a: u64,
        b: u64,
        overlap_fraction: f64,
    },
}

/// Configuration loading/validation errors. Eager and whole-file: the
/// first error rejects the entire config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error(
        "`{a}` and `{b}` are aliases for the same setting but were given conflicting values"
    )]
    ConflictingAliases { a: &'static str, b: &'static str },
}
