//! End-to-end scenarios A, B, C, E, F. Scenario D (archive round-trip)
//! lives in `scipathj-store`'s own tests since it exercises no
//! orchestrator machinery.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scipathj_core::{DetectedNucleus, DetectorError, NucleusDetector};
use scipathj_orchestrator::{CancellationToken, Event, ImageDecodeError, ImageReader, PipelineOrchestrator};
use scipathj_store::RoiStore;
use scipathj_types::{BitDepth, Category, Config, Dimensions, Image, Point, Polygon};

struct BlankReader {
    dims: Dimensions,
}

impl ImageReader for BlankReader {
    fn read(&self, _path: &Path) -> Result<Image, ImageDecodeError> {
        let pixel_count = self.dims.pixel_count() as usize;
        Ok(Image::new(self.dims, 3, BitDepth::Eight, vec![255_u8; pixel_count * 3], None))
    }
}

struct FixedNuclei(Vec<Polygon>);

impl NucleusDetector for FixedNuclei {
    fn detect(&self, _image: &Image) -> Result<Vec<DetectedNucleus>, DetectorError> {
        Ok(self.0.iter().cloned().map(|polygon| DetectedNucleus { polygon, probability: 1.0 }).collect())
    }
}

fn disk(cx: f32, cy: f32, radius: f32) -> Polygon {
    let points: Vec<Point> = (0..32)
        .map(|i| {
            let angle = std::f32::consts::TAU * (i as f32) / 32.0;
            Point::new(cx + radius * angle.cos(), cy + radius * angle.sin())
        })
        .collect();
    Polygon::new(points).expect("32-gon has enough vertices")
}

#[test]
fn scenario_a_empty_white_image_yields_no_rois() {
    let config = Config::default();
    let reader = BlankReader { dims: Dimensions::new(100, 100) };
    let orchestrator = PipelineOrchestrator::new(reader, Arc::new(FixedNuclei(Vec::new())), None, config);
    let store = RoiStore::new();
    let (tx, _rx) = scipathj_orchestrator::subscribe();
    let cancellation = CancellationToken::new();

    let report = orchestrator.run(&[PathBuf::from("white.png")], &store, &cancellation, &tx);

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    for category in [Category::Vessel, Category::Nucleus, Category::Cytoplasm, Category::Cell] {
        assert_eq!(report.roi_counts_by_category.get(&category).copied().unwrap_or(0), 0);
    }
}

#[test]
fn scenario_b_single_nucleus_no_vessels_produces_one_cell() {
    let mut config = Config::default();
    config.vessel_segmentation.threshold = 10.0;

    let reader = BlankReader { dims: Dimensions::new(200, 200) };
    let nucleus = disk(100.0, 100.0, 10.0);
    let orchestrator = PipelineOrchestrator::new(reader, Arc::new(FixedNuclei(vec![nucleus])), None, config);
    let store = RoiStore::new();
    let (tx, _rx) = scipathj_orchestrator::subscribe();
    let cancellation = CancellationToken::new();

    let report = orchestrator.run(&[PathBuf::from("single.png")], &store, &cancellation, &tx);

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.roi_counts_by_category.get(&Category::Vessel).copied().unwrap_or(0), 0);
    assert_eq!(report.roi_counts_by_category.get(&Category::Nucleus).copied().unwrap_or(0), 1);
    assert_eq!(report.roi_counts_by_category.get(&Category::Cytoplasm).copied().unwrap_or(0), 1);
    assert_eq!(report.roi_counts_by_category.get(&Category::Cell).copied().unwrap_or(0), 1);

    let cells = store.by_category("single.png", Category::Cell);
    assert_eq!(cells.len(), 1);
    assert_eq!(
        cells[0].links().expect("a CELL roi always carries links").nucleus_id,
        store.by_category("single.png", Category::Nucleus)[0].id()
    );
}

#[test]
fn scenario_c_two_nuclei_separated_by_a_vessel_yield_two_disjoint_cells() {
    let mut config = Config::default();
    config.vessel_segmentation.threshold = 10.0;

    let reader = BlankReader { dims: Dimensions::new(200, 200) };
    let nuclei = vec![disk(50.0, 100.0, 8.0), disk(150.0, 100.0, 8.0)];
    let orchestrator = PipelineOrchestrator::new(reader, Arc::new(FixedNuclei(nuclei)), None, config);
    let store = RoiStore::new();
    let (tx, _rx) = scipathj_orchestrator::subscribe();
    let cancellation = CancellationToken::new();

    let report = orchestrator.run(&[PathBuf::from("pair.png")], &store, &cancellation, &tx);

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.roi_counts_by_category.get(&Category::Nucleus).copied().unwrap_or(0), 2);
    assert_eq!(report.roi_counts_by_category.get(&Category::Cell).copied().unwrap_or(0), 2);

    let cells = store.by_category("pair.png", Category::Cell);
    assert_eq!(cells.len(), 2);
    // Each cell stays on its own side of the x=100 vessel band; their
    // bounding boxes must not cross over it.
    let centroid_xs: Vec<f32> = cells.iter().map(|c| c.centroid().x).collect();
    assert!(centroid_xs.iter().any(|&x| x < 100.0));
    assert!(centroid_xs.iter().any(|&x| x > 100.0));
}

#[test]
fn scenario_e_cancellation_mid_batch_accounts_for_every_image() {
    struct SlowReader;
    impl ImageReader for SlowReader {
        fn read(&self, _path: &Path) -> Result<Image, ImageDecodeError> {
            std::thread::sleep(Duration::from_millis(5));
            Ok(Image::new(Dimensions::new(4, 4), 3, BitDepth::Eight, vec![255_u8; 4 * 4 * 3], None))
        }
    }

    let mut config = Config::default();
    config.batch.parallelism = 1;

    let orchestrator = Arc::new(PipelineOrchestrator::new(SlowReader, Arc::new(FixedNuclei(Vec::new())), None, config));
    let cancellation = CancellationToken::new();
    let (tx, rx) = scipathj_orchestrator::subscribe();
    let paths: Vec<PathBuf> = (0..100).map(|i| PathBuf::from(format!("img_{i}.png"))).collect();

    let orchestrator_for_thread = Arc::clone(&orchestrator);
    let cancellation_for_thread = cancellation.clone();
    let handle = std::thread::spawn(move || {
        let store = RoiStore::new();
        let report = orchestrator_for_thread.run(&paths, &store, &cancellation_for_thread, &tx);
        (report, store)
    });

    let mut completed = 0;
    for event in &rx {
        match event {
            Event::ImageCompleted { .. } => {
                completed += 1;
                if completed == 10 {
                    cancellation.cancel();
                }
            }
            Event::BatchCompleted { .. } | Event::BatchCancelled => break,
            _ => {}
        }
    }

    let (report, store) = handle.join().expect("orchestrator thread panicked");

    assert!(report.is_fully_accounted());
    assert_eq!(report.total_images, 100);
    assert!(report.succeeded >= 10, "expected at least the 10 images observed before cancelling");
    assert!(report.cancelled > 0, "expected some images to be cancelled before processing");

    // Cancelled images are abandoned before the pipeline runs, so none of
    // their ROIs (there would be none here regardless, since no nuclei
    // are ever detected) can have been partially written.
    for entry in &report.entries {
        if entry.outcome == scipathj_orchestrator::ImageOutcome::Cancelled {
            assert!(store.get_all(&entry.image_key).is_empty());
        }
    }
}

#[test]
fn scenario_f_classification_below_threshold_reports_unknown() {
    use scipathj_core::{classify, ClassifierModel, Tree, TreeNode};
    use scipathj_types::FeatureValue;
    use std::collections::HashMap;

    // Three near-tied classes: softmax of {0.0, -0.1, -0.2} tops out
    // around 0.37, below the 0.5 confidence threshold, so no class wins
    // outright even though every class still reports a probability.
    let leaf_by_class = [0.0_f64, -0.1, -0.2];
    let trees: Vec<Tree> = leaf_by_class
        .iter()
        .enumerate()
        .map(|(target_class, &leaf_value)| Tree {
            nodes: vec![TreeNode {
                feature_index: None,
                split_value: 0.0,
                left: 0,
                right: 0,
                leaf_value,
                default_left: true,
            }],
            root: 0,
            target_class,
        })
        .collect();
    let model = ClassifierModel::new(
        vec!["tumor".to_string(), "stroma".to_string(), "necrosis".to_string()],
        vec!["area".to_string()],
        trees,
    )
    .expect("structurally valid model");

    let features = HashMap::from([("area".to_string(), FeatureValue::Number(100.0))]);
    let classification = classify(&features, &model, 0.5);

    assert_eq!(classification.predicted_class, "unknown");
    assert_eq!(classification.probabilities.len(), 3);
    assert!(classification.probabilities.values().all(|&p| p < 0.5));
}
