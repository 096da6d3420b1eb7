//! Thread-safe multi-image ROI index, ImageJ-compatible ROI archive
//! codec, and CSV export for SciPathJ.

pub mod csv_export;
pub mod error;
pub mod roi_archive;
pub mod store;

pub use csv_export::{export_per_image_summary, export_per_roi, CsvFormat};
pub use error::StoreError;
pub use roi_archive::{decode_roi, encode_roi, export_archive, import_archive};
pub use store::RoiStore;
