//! Batch orchestration: the `ImageReader` collaborator contract, a
//! worker pool that runs the `scipathj-core` pipeline over many images
//! concurrently, cooperative cancellation, retry of transient errors,
//! and progress events.

pub mod error;
pub mod events;
pub mod image_reader;
pub mod orchestrator;
pub mod pipeline;
pub mod report;

pub use error::{ErrorKind, ImageDecodeError};
pub use events::{Event, EventReceiver, EventSender};
pub use image_reader::{CachingImageReader, FileSystemImageReader, ImageReader};
pub use orchestrator::{subscribe, CancellationToken, PipelineOrchestrator};
pub use pipeline::run_pipeline;
pub use report::{BatchReport, ImageOutcome, ImageReportEntry};
