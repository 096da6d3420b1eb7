//! Per-image error kinds and the image-reading collaborator's error type.
//!
//! Mirrors `scipathj_core::CoreError`'s shape (one `thiserror` enum per
//! seam, `#[from]` conversions from the lower layers) generalized to the
//! orchestrator's wider set of failure modes: I/O, decode, timeout,
//! cancellation, and out-of-memory, none of which `scipathj-core` itself
//! needs to know about.

use thiserror::Error;

/// Failed to decode an image file into a [`scipathj_types::Image`].
#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported or corrupt image format at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// One of the distinguishable error kinds a failed image carries in its
/// `ImageFailed` event / `BatchReport` entry. The `retryable` classification
/// follows the spec's propagation policy exactly: `Io` and `OutOfMemory`
/// are retried up to `BatchSettings::retry_count` times; every other kind
/// fails the image on the first occurrence.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("image decode error: {0}")]
    ImageDecode(String),

    #[error("stain matrix is singular or ill-conditioned")]
    StainMatrixSingular,

    #[error("classifier model format error: {0}")]
    ModelFormat(String),

    #[error("nucleus detector failed: {0}")]
    Detector(String),

    #[error("ROI geometry invariant violation: {0}")]
    Geometry(String),

    #[error("cancelled before completion")]
    Cancelled,

    #[error("per-image timeout exceeded")]
    Timeout,

    #[error("out of memory")]
    OutOfMemory,
}

impl ErrorKind {
    /// Whether the orchestrator should retry this image (up to
    /// `retry_count` times) rather than counting it as failed
    /// immediately. Only transient, environment-caused errors are
    /// retryable; configuration and invariant-violation errors are not,
    /// per the spec's propagation policy.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::OutOfMemory)
    }

    #[must_use]
    pub const fn is_non_retryable_and_batch_fatal(&self) -> bool {
        matches!(self, Self::ModelFormat(_))
    }
}

impl From<&scipathj_core::CoreError> for ErrorKind {
    fn from(err: &scipathj_core::CoreError) -> Self {
        match err {
            scipathj_core::CoreError::StainMatrixSingular { .. } => Self::StainMatrixSingular,
            scipathj_core::CoreError::Geometry(g) => Self::Geometry(g.to_string()),
            scipathj_core::CoreError::Detector(d) => Self::Detector(d.to_string()),
            scipathj_core::CoreError::ModelFormat(m) => Self::ModelFormat(m.to_string()),
            scipathj_core::CoreError::WrongChannelCount { found } => {
                Self::ImageDecode(format!("expected 3 RGB channels, found {found}"))
            }
        }
    }
}

impl From<&ImageDecodeError> for ErrorKind {
    fn from(err: &ImageDecodeError) -> Self {
        match err {
            ImageDecodeError::Io { source, .. } => Self::Io(source.to_string()),
            ImageDecodeError::Decode { source, .. } => Self::ImageDecode(source.to_string()),
        }
    }
}
