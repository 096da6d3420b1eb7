//! `BatchReport`: the orchestrator's summary of one `run()` invocation,
//! and the source of truth for which images completed (ROI insertion
//! order across images is explicitly unordered per the spec's
//! concurrency model, so consumers must consult this report rather than
//! ROIStore iteration order).

use std::collections::HashMap;
use std::time::Duration;

use scipathj_types::Category;

/// Why one image did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Succeeded,
    Failed { error_kind: String, message: String },
    Cancelled,
}

/// Per-image entry recorded in the final report.
#[derive(Debug, Clone)]
pub struct ImageReportEntry {
    pub image_key: String,
    pub outcome: ImageOutcome,
}

/// Summary of one orchestrator run. `succeeded + failed + cancelled ==
/// total_images` always holds (testable property 8).
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub total_images: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub elapsed: Duration,
    pub roi_counts_by_category: HashMap<Category, usize>,
    pub entries: Vec<ImageReportEntry>,
}

impl BatchReport {
    #[must_use]
    pub fn is_fully_accounted(&self) -> bool {
        self.succeeded + self.failed + self.cancelled == self.total_images
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totality_holds_for_an_empty_report() {
        let report = BatchReport {
            total_images: 0,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            elapsed: Duration::ZERO,
            roi_counts_by_category: HashMap::new(),
            entries: Vec::new(),
        };
        assert!(report.is_fully_accounted());
    }
}
