//! Error types for archive I/O, malformed ImageJ ROI records, and CSV
//! export.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("malformed ImageJ ROI record in entry {entry}: {reason}")]
    MalformedRoi { entry: String, reason: String },

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unknown image_key {0:?}")]
    UnknownImage(String),

    #[error("unknown ROI id {roi_id} for image {image_key:?}")]
    UnknownRoi { image_key: String, roi_id: u64 },
}
