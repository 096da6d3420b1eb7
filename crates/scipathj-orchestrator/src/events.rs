//! Progress events published by the orchestrator: a single-producer
//! (per worker, all sharing one `Sender`), multiple-consumer channel —
//! the event-bus contract the spec's Design Notes call for, built on
//! `crossbeam_channel` (already in the teacher's dependency stack).

use std::collections::HashMap;

use scipathj_types::Category;

use crate::error::ErrorKind;
use crate::report::BatchReport;

/// One logical event in the batch's lifecycle. No wire format is
/// mandated; consumers receive these directly off the channel.
#[derive(Debug)]
pub enum Event {
    BatchStarted { total_images: usize },
    ImageStarted { image_key: String },
    ImageProgress { image_key: String, stage: &'static str, fraction: f32 },
    ImageCompleted { image_key: String, roi_counts_by_category: HashMap<Category, usize> },
    ImageFailed { image_key: String, error_kind: String, message: String },
    BatchCompleted { report: BatchReport },
    BatchCancelled,
}

impl Event {
    pub(crate) fn failed(image_key: impl Into<String>, error_kind: &ErrorKind) -> Self {
        Self::ImageFailed {
            image_key: image_key.into(),
            error_kind: error_kind_label(error_kind).to_string(),
            message: error_kind.to_string(),
        }
    }
}

const fn error_kind_label(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Io(_) => "Io",
        ErrorKind::ImageDecode(_) => "ImageDecode",
        ErrorKind::StainMatrixSingular => "StainMatrixSingular",
        ErrorKind::ModelFormat(_) => "ModelFormat",
        ErrorKind::Detector(_) => "Detector",
        ErrorKind::Geometry(_) => "Geometry",
        ErrorKind::Cancelled => "Cancelled",
        ErrorKind::Timeout => "Timeout",
        ErrorKind::OutOfMemory => "OutOfMemory",
    }
}

pub type EventSender = crossbeam_channel::Sender<Event>;
pub type EventReceiver = crossbeam_channel::Receiver<Event>;
