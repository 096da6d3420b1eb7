//! `PipelineOrchestrator`: the batch worker pool.
//!
//! Grounded on the decode/inference producer-consumer split in
//! `video_extract_core::parallel_pipeline` — a bounded `crossbeam_channel`
//! feeding a fixed pool of `std::thread::spawn` workers — generalized from
//! that module's fixed two-thread decode/inference split to an
//! `N`-worker pool pulling from one shared work queue, since batch
//! parallelism here is "more images at once" rather than "overlap two
//! pipeline stages".

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use scipathj_core::{ClassifierModel, NucleusDetector};
use scipathj_store::RoiStore;
use scipathj_types::{Category, Config};

use crate::error::ErrorKind;
use crate::events::{Event, EventReceiver, EventSender};
use crate::image_reader::ImageReader;
use crate::pipeline::run_pipeline;
use crate::report::{BatchReport, ImageOutcome, ImageReportEntry};

/// Runs the batch pipeline over a set of image paths with a fixed-size
/// worker pool, publishing [`Event`]s as it goes.
pub struct PipelineOrchestrator<R> {
    reader: Arc<R>,
    detector: Arc<dyn NucleusDetector>,
    classifier: Option<Arc<ClassifierModel>>,
    config: Arc<Config>,
}

/// Cooperative cancellation handle. Workers check this between stage
/// boundaries (one checkpoint per image, at the top of each image's
/// processing) and abandon in-flight work once set, rather than
/// interrupting mid-stage computation.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct WorkItem {
    index: usize,
    path: PathBuf,
}

impl<R: ImageReader + 'static> PipelineOrchestrator<R> {
    #[must_use]
    pub fn new(
        reader: R,
        detector: Arc<dyn NucleusDetector>,
        classifier: Option<Arc<ClassifierModel>>,
        config: Config,
    ) -> Self {
        Self {
            reader: Arc::new(reader),
            detector,
            classifier,
            config: Arc::new(config),
        }
    }

    /// Runs the batch, blocking until every image has succeeded, failed,
    /// or been cancelled. Events are published to `events` throughout;
    /// the final [`BatchReport`] is both returned and sent as the last
    /// `BatchCompleted`/`BatchCancelled` event.
    #[must_use]
    pub fn run(
        &self,
        image_paths: &[PathBuf],
        store: &RoiStore,
        cancellation: &CancellationToken,
        events: &EventSender,
    ) -> BatchReport {
        let start = Instant::now();
        let total_images = image_paths.len();
        let _ = events.send(Event::BatchStarted { total_images });

        let (work_tx, work_rx) = bounded::<WorkItem>(total_images.max(1));
        for (index, path) in image_paths.iter().cloned().enumerate() {
            // capacity == total_images (or 1), so this never blocks.
            let _ = work_tx.send(WorkItem { index, path });
        }
        drop(work_tx);

        let entries: Arc<Mutex<Vec<Option<ImageReportEntry>>>> = Arc::new(Mutex::new(vec![None; total_images]));
        let roi_counts: Arc<Mutex<std::collections::HashMap<Category, usize>>> = Arc::new(Mutex::new(std::collections::HashMap::new()));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let cancelled_count = Arc::new(AtomicUsize::new(0));

        let worker_count = self.config.batch.parallelism.max(1) as usize;
        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let work_rx = work_rx.clone();
                let entries = Arc::clone(&entries);
                let roi_counts = Arc::clone(&roi_counts);
                let succeeded = Arc::clone(&succeeded);
                let failed = Arc::clone(&failed);
                let cancelled_count = Arc::clone(&cancelled_count);

                scope.spawn(|| {
                    while let Ok(item) = work_rx.recv() {
                        if cancellation.is_cancelled() {
                            let _ = events.send(Event::ImageFailed {
                                image_key: item.path.display().to_string(),
                                error_kind: "Cancelled".to_string(),
                                message: ErrorKind::Cancelled.to_string(),
                            });
                            cancelled_count.fetch_add(1, Ordering::SeqCst);
                            entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)[item.index] = Some(ImageReportEntry {
                                image_key: item.path.display().to_string(),
                                outcome: ImageOutcome::Cancelled,
                            });
                            continue;
                        }

                        let image_key = item.path.display().to_string();
                        let _ = events.send(Event::ImageStarted { image_key: image_key.clone() });

                        let outcome = self.process_one(&item.path, &image_key, store, cancellation, events);

                        match outcome {
                            Ok(counts) => {
                                succeeded.fetch_add(1, Ordering::SeqCst);
                                {
                                    let mut totals = roi_counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                                    for (category, count) in &counts {
                                        *totals.entry(*category).or_insert(0) += count;
                                    }
                                }
                                let _ = events.send(Event::ImageCompleted {
                                    image_key: image_key.clone(),
                                    roi_counts_by_category: counts,
                                });
                                entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)[item.index] = Some(ImageReportEntry {
                                    image_key,
                                    outcome: ImageOutcome::Succeeded,
                                });
                            }
                            Err(kind) => {
                                failed.fetch_add(1, Ordering::SeqCst);
                                let _ = events.send(Event::failed(image_key.clone(), &kind));
                                entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)[item.index] = Some(ImageReportEntry {
                                    image_key,
                                    outcome: ImageOutcome::Failed {
                                        error_kind: format!("{kind:?}"),
                                        message: kind.to_string(),
                                    },
                                });
                                if kind.is_non_retryable_and_batch_fatal() && !self.config.batch.continue_on_error {
                                    cancellation.cancel();
                                }
                            }
                        }
                    }
                });
            }
        });

        let entries: Vec<ImageReportEntry> = Arc::try_unwrap(entries)
            .map(|m| m.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner))
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                entry.unwrap_or_else(|| ImageReportEntry {
                    image_key: image_paths.get(index).map(|p| p.display().to_string()).unwrap_or_default(),
                    outcome: ImageOutcome::Cancelled,
                })
            })
            .collect();

        let roi_counts_by_category = Arc::try_unwrap(roi_counts)
            .map(|m| m.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner))
            .unwrap_or_default();

        let report = BatchReport {
            total_images,
            succeeded: succeeded.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            cancelled: cancelled_count.load(Ordering::SeqCst),
            elapsed: start.elapsed(),
            roi_counts_by_category,
            entries,
        };

        if cancellation.is_cancelled() {
            let _ = events.send(Event::BatchCancelled);
        } else {
            let _ = events.send(Event::BatchCompleted { report: report.clone() });
        }

        report
    }

    /// Decodes and runs the per-image pipeline for one image, retrying
    /// transient ([`ErrorKind::is_retryable`]) failures up to
    /// `retry_count` times and enforcing `image_timeout_ms` if set.
    fn process_one(
        &self,
        path: &std::path::Path,
        image_key: &str,
        store: &RoiStore,
        cancellation: &CancellationToken,
        events: &EventSender,
    ) -> Result<std::collections::HashMap<Category, usize>, ErrorKind> {
        let settings = &self.config.batch;
        let deadline = settings.image_timeout_ms.map(|ms| Instant::now() + Duration::from_millis(u64::from(ms)));

        let mut attempt = 0_u32;
        loop {
            if cancellation.is_cancelled() {
                return Err(ErrorKind::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ErrorKind::Timeout);
                }
            }

            let _ = events.send(Event::ImageProgress {
                image_key: image_key.to_string(),
                stage: "decode",
                fraction: 0.0,
            });

            let result = self
                .reader
                .read(path)
                .map_err(|e| ErrorKind::from(&e))
                .and_then(|image| {
                    let _ = events.send(Event::ImageProgress {
                        image_key: image_key.to_string(),
                        stage: "analyze",
                        fraction: 0.2,
                    });
                    run_pipeline(&image, image_key, &self.config, self.detector.as_ref(), self.classifier.as_deref(), store)
                });

            match result {
                Ok(counts) => return Ok(counts),
                Err(kind) if kind.is_retryable() && attempt < settings.retry_count => {
                    attempt += 1;
                    continue;
                }
                Err(kind) => return Err(kind),
            }
        }
    }

    /// Emits a throttled progress tick; the orchestrator samples this at
    /// most once per `progress_cadence_ms`. Exposed for pipeline stages
    /// that want to report sub-image progress outside the fixed
    /// decode/analyze checkpoints above.
    #[must_use]
    pub fn progress_cadence(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.batch.progress_cadence_ms))
    }
}

/// Convenience alias matching the spec's terminology for the
/// subscriber side of the event bus.
pub fn subscribe() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scipathj_core::DetectedNucleus;
    use scipathj_types::{BitDepth, Dimensions, Image};

    use super::*;
    use crate::error::ImageDecodeError;

    struct BlankImageReader;
    impl ImageReader for BlankImageReader {
        fn read(&self, _path: &std::path::Path) -> Result<Image, ImageDecodeError> {
            Ok(Image::new(Dimensions::new(8, 8), 3, BitDepth::Eight, vec![255_u8; 8 * 8 * 3], None))
        }
    }

    struct NoNuclei;
    impl NucleusDetector for NoNuclei {
        fn detect(&self, _image: &Image) -> Result<Vec<DetectedNucleus>, scipathj_core::DetectorError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn batch_totality_holds_for_a_small_run() {
        let orchestrator =
            PipelineOrchestrator::new(BlankImageReader, Arc::new(NoNuclei), None, Config::default());
        let store = RoiStore::new();
        let (tx, _rx) = subscribe();
        let cancellation = CancellationToken::new();
        let paths = vec![PathBuf::from("a.png"), PathBuf::from("b.png"), PathBuf::from("c.png")];

        let report = orchestrator.run(&paths, &store, &cancellation, &tx);

        assert!(report.is_fully_accounted());
        assert_eq!(report.total_images, 3);
        assert_eq!(report.succeeded, 3);
    }

    #[test]
    fn pre_cancelled_batch_marks_every_image_cancelled() {
        let orchestrator =
            PipelineOrchestrator::new(BlankImageReader, Arc::new(NoNuclei), None, Config::default());
        let store = RoiStore::new();
        let (tx, _rx) = subscribe();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let paths = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];

        let report = orchestrator.run(&paths, &store, &cancellation, &tx);

        assert!(report.is_fully_accounted());
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.succeeded, 0);
    }
}
