//! Wires the six per-image stages (§4.1–§4.6) together for one image and
//! inserts the resulting ROIs into the store, under the categories and
//! links the spec's data model requires.

use std::collections::HashMap;
use std::path::Path;

use scipathj_core::{classify, construct, deconvolve, detect_nuclei, extract, segment, ClassifierModel, NeighborhoodIndex, NucleusDetector};
use scipathj_store::RoiStore;
use scipathj_types::{Category, CellLinks, Config, Geometry, Image, Point, Polygon, Roi};

use crate::error::ErrorKind;

/// Runs color deconvolution, vessel segmentation, nucleus detection,
/// cell construction, feature extraction, and (if a model is supplied)
/// classification, inserting every resulting ROI into `store` under
/// `image_key`.
///
/// Returns the per-category ROI counts produced for this image, for the
/// `ImageCompleted` event and the batch report.
///
/// # Errors
/// Returns an [`ErrorKind`] for the first non-retryable failure: a
/// singular stain matrix, a wrong channel count, or a cell-construction
/// geometry invariant violation. Per-tile nucleus-detector failures are
/// absorbed inside [`detect_nuclei`] and never reach this function.
pub fn run_pipeline(
    image: &Image,
    image_key: &str,
    config: &Config,
    detector: &dyn NucleusDetector,
    classifier: Option<&ClassifierModel>,
    store: &RoiStore,
) -> Result<HashMap<Category, usize>, ErrorKind> {
    let stem = image_stem(image_key);
    let mut counts: HashMap<Category, usize> = HashMap::new();

    let od = deconvolve(image, &config.color_deconvolution).map_err(|e| ErrorKind::from(&e))?;

    let vessel_segments = segment(&od, &config.vessel_segmentation).map_err(|e| ErrorKind::from(&e))?;
    let vessel_polygons: Vec<Polygon> = vessel_segments.iter().map(|v| v.polygon.clone()).collect();

    let mut vessel_ids = Vec::with_capacity(vessel_polygons.len());
    for (i, polygon) in vessel_polygons.iter().enumerate() {
        let name = format!("{stem}_vessel_{i}");
        let roi = Roi::new(0, image_key, name, Category::Vessel, Geometry::Polygon(polygon.clone()));
        vessel_ids.push(store.add(image_key, roi));
    }
    counts.insert(Category::Vessel, vessel_ids.len());

    let nucleus_polygons = detect_nuclei(detector, image, &config.nuclear_segmentation);
    let mut nucleus_ids = Vec::with_capacity(nucleus_polygons.len());
    for (i, polygon) in nucleus_polygons.iter().enumerate() {
        let name = format!("{stem}_nucleus_{i}");
        let roi = Roi::new(0, image_key, name, Category::Nucleus, Geometry::Polygon(polygon.clone()));
        nucleus_ids.push(store.add(image_key, roi));
    }
    counts.insert(Category::Nucleus, nucleus_ids.len());

    let construction = match construct(
        &nucleus_polygons,
        &vessel_polygons,
        image.dimensions(),
        &config.cytoplasm_segmentation,
    ) {
        Ok(construction) => construction,
        Err(e) => {
            // Vessel/nucleus ROIs were already committed above; a
            // half-processed image must leave no trace in the store.
            store.clear(image_key);
            return Err(ErrorKind::from(&e));
        }
    };
    if let Err(e) = scipathj_core::cell_constructor::geometry_invariants_hold(&construction) {
        store.clear(image_key);
        return Err(ErrorKind::Geometry(e.to_string()));
    }

    let mut cytoplasm_ids = Vec::with_capacity(construction.cytoplasms.len());
    for (i, polygon) in construction.cytoplasms.iter().enumerate() {
        let name = format!("{stem}_cytoplasm_{i}");
        let roi = Roi::new(0, image_key, name, Category::Cytoplasm, Geometry::Polygon(polygon.clone()));
        cytoplasm_ids.push(store.add(image_key, roi));
    }
    counts.insert(Category::Cytoplasm, cytoplasm_ids.len());

    let mut cell_ids = Vec::with_capacity(construction.cells.len());
    for &(cell_idx, nucleus_idx, cytoplasm_idx) in &construction.cell_links {
        let polygon = &construction.cells[cell_idx];
        let name = format!("{stem}_cell_{cell_idx}");
        let links = CellLinks {
            nucleus_id: nucleus_ids[nucleus_idx],
            cytoplasm_id: cytoplasm_ids[cytoplasm_idx],
        };
        let roi = Roi::new(0, image_key, name, Category::Cell, Geometry::Polygon(polygon.clone())).with_links(links);
        cell_ids.push(store.add(image_key, roi));
    }
    counts.insert(Category::Cell, cell_ids.len());

    if config.feature_extraction.groups.morphology || config.feature_extraction.groups.intensity || config.feature_extraction.groups.spatial
    {
        extract_and_classify(image, &od, image_key, config, classifier, store);
    }

    Ok(counts)
}

fn extract_and_classify(
    image: &Image,
    od: &scipathj_types::OpticalDensityChannels,
    image_key: &str,
    config: &Config,
    classifier: Option<&ClassifierModel>,
    store: &RoiStore,
) {
    let grayscale = to_grayscale(image);
    let all_rois = store.get_all(image_key);
    let vessels: Vec<Polygon> = all_rois
        .iter()
        .filter(|r| r.category() == Category::Vessel)
        .filter_map(|r| match r.geometry() {
            Geometry::Polygon(p) => Some(p.clone()),
            Geometry::Rectangle(_) => None,
        })
        .collect();
    let centroids: Vec<(u64, Category, Point)> = all_rois.iter().map(|r| (r.id(), r.category(), r.centroid())).collect();
    let index = NeighborhoodIndex::build(&centroids, &vessels);

    for roi in &all_rois {
        if roi.category() == Category::Ignore {
            continue;
        }
        let features = extract(roi, od, &grayscale, &index, &config.feature_extraction);
        let classification = classifier.map(|model| classify(&features, model, config.classification.confidence_threshold));
        store.update(image_key, roi.id(), |roi| {
            let roi = roi.with_features(features);
            match classification {
                Some(classification) => roi.with_classification(classification),
                None => roi,
            }
        });
    }
}

/// Row-major luma at `0.299R + 0.587G + 0.114B`, matching the standard
/// conversion `mujou_pipeline::decode_and_grayscale` documents for its
/// own RGB-to-gray step.
fn to_grayscale(image: &Image) -> Vec<f32> {
    let dims = image.dimensions();
    let pixel_count = dims.pixel_count() as usize;
    let mut out = Vec::with_capacity(pixel_count);
    for y in 0..dims.height {
        for x in 0..dims.width {
            let [r, g, b] = image.rgb_at(x, y);
            let luma = 0.299_f32.mul_add(f32::from(r), 0.587_f32.mul_add(f32::from(g), 0.114 * f32::from(b)));
            out.push(luma);
        }
    }
    out
}

fn image_stem(image_key: &str) -> String {
    Path::new(image_key).file_stem().and_then(std::ffi::OsStr::to_str).unwrap_or(image_key).to_string()
}
