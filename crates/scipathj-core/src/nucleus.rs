//! NucleusAdapter: wraps an injected [`NucleusDetector`] and normalizes
//! its output to internal [`Polygon`]s.

use scipathj_types::{BitDepth, Dimensions, Image, NuclearSegmentationSettings, Polygon};

use crate::error::DetectorError;
use crate::geo_interop::{iou, to_geo};

/// One polygon detected by the external star-convex polygon detector,
/// in the coordinate space it was given (tile-local or whole-image),
/// together with its confidence score.
#[derive(Debug, Clone)]
pub struct DetectedNucleus {
    pub polygon: Polygon,
    pub probability: f64,
}

/// External collaborator: a star-convex polygon detector (typically a
/// neural network). Its implementation is out of scope; only this
/// contract is specified. `Send + Sync` so the batch orchestrator can
/// share one detector across its worker pool behind an `Arc`.
pub trait NucleusDetector: Send + Sync {
    /// # Errors
    /// Returns a [`DetectorError`] if detection fails for this image/tile.
    fn detect(&self, image: &Image) -> Result<Vec<DetectedNucleus>, DetectorError>;
}

/// `detect(Image) -> [Polygon]`, generalized to carry per-nucleus
/// confidence through tiling and non-maximum suppression.
///
/// # Errors
/// This function itself never returns an error: a failing tile yields no
/// nuclei for that tile (logged via `tracing::warn!`) and the adapter
/// proceeds with the remaining tiles, per the spec's failure mode.
#[must_use]
pub fn detect_nuclei(
    detector: &dyn NucleusDetector,
    image: &Image,
    settings: &NuclearSegmentationSettings,
) -> Vec<Polygon> {
    let normalized = normalize_percentiles(image, settings);
    let tiles = tile_image(&normalized, settings.tile_size);

    let mut detections: Vec<DetectedNucleus> = Vec::new();
    for tile in &tiles {
        match detector.detect(&tile.image) {
            Ok(found) => {
                for mut d in found {
                    d.polygon = translate(&d.polygon, tile.origin_x, tile.origin_y);
                    detections.push(d);
                }
            }
            Err(err) => {
                tracing::warn!(
                    tile_x = tile.origin_x,
                    tile_y = tile.origin_y,
                    error = %err,
                    "nucleus detector failed for tile; proceeding without it",
                );
            }
        }
    }

    let merged = non_maximum_suppression(detections, settings.nms_threshold);

    merged
        .into_iter()
        .filter(|d| d.probability >= settings.prob_threshold)
        .map(|d| d.polygon)
        .collect()
}

struct Tile {
    image: Image,
    origin_x: u32,
    origin_y: u32,
}

/// Splits `image` into `tile_size`-ish tiles with 10% overlap when either
/// dimension exceeds `tile_size`; otherwise returns the whole image as a
/// single tile at the origin.
fn tile_image(image: &Image, tile_size: u32) -> Vec<Tile> {
    let dims = image.dimensions();
    if dims.width <= tile_size && dims.height <= tile_size {
        return vec![Tile {
            image: image.clone(),
            origin_x: 0,
            origin_y: 0,
        }];
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let stride = ((f64::from(tile_size) * 0.9).round() as u32).max(1);
    let mut tiles = Vec::new();
    let mut y = 0;
    loop {
        let mut x = 0;
        loop {
            let w = tile_size.min(dims.width - x);
            let h = tile_size.min(dims.height - y);
            tiles.push(Tile {
                image: crop(image, x, y, w, h),
                origin_x: x,
                origin_y: y,
            });
            if x + w >= dims.width {
                break;
            }
            x += stride;
        }
        if y + tile_size.min(dims.height - y) >= dims.height {
            break;
        }
        y += stride;
    }
    tiles
}

fn crop(image: &Image, x: u32, y: u32, w: u32, h: u32) -> Image {
    let channels = image.channels();
    let src = image.samples();
    let src_width = image.dimensions().width as usize;
    let mut out = Vec::with_capacity((w * h) as usize * channels as usize);
    for row in 0..h {
        let src_row = (y + row) as usize;
        let start = (src_row * src_width + x as usize) * channels as usize;
        let len = w as usize * channels as usize;
        out.extend_from_slice(&src[start..start + len]);
    }
    Image::new(Dimensions::new(w, h), channels, image.bit_depth(), out, None)
}

fn translate(polygon: &Polygon, dx: u32, dy: u32) -> Polygon {
    #[allow(clippy::cast_precision_loss)]
    let (dx, dy) = (dx as f32, dy as f32);
    let shifted: Vec<_> = polygon
        .vertices()
        .iter()
        .map(|p| scipathj_types::Point::new(p.x + dx, p.y + dy))
        .collect();
    // Translation cannot create a degenerate polygon from a valid one.
    #[allow(clippy::expect_used)]
    Polygon::new(shifted).expect("translated polygon retains vertex count")
}

/// Greedy IoU-based NMS: sort by descending probability, keep a detection
/// only if it does not overlap an already-kept one above `nms_threshold`.
fn non_maximum_suppression(
    mut detections: Vec<DetectedNucleus>,
    nms_threshold: f64,
) -> Vec<DetectedNucleus> {
    detections.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<DetectedNucleus> = Vec::new();
    'candidates: for candidate in detections {
        let candidate_geo = to_geo(&candidate.polygon);
        for existing in &kept {
            let existing_geo = to_geo(&existing.polygon);
            if iou(&candidate_geo, &existing_geo) > nms_threshold {
                continue 'candidates;
            }
        }
        kept.push(candidate);
    }
    kept
}

/// Clips the image's grayscale intensity distribution to
/// `[bottom_percentile, top_percentile]` then rescales to `[0, 255]`
/// (rather than `[0, 1]`, since `Image` only ever stores `u8` samples;
/// see the Open Question resolution in DESIGN.md).
fn normalize_percentiles(image: &Image, settings: &NuclearSegmentationSettings) -> Image {
    let dims = image.dimensions();
    let channels = image.channels();
    let samples = image.samples();
    let pixel_count = dims.pixel_count() as usize;

    let mut gray = Vec::with_capacity(pixel_count);
    for i in 0..pixel_count {
        let base = i * channels as usize;
        let value = if channels >= 3 {
            let r = f32::from(samples[base]);
            let g = f32::from(samples[base + 1]);
            let b = f32::from(samples[base + 2]);
            0.299 * r + 0.587 * g + 0.114 * b
        } else {
            f32::from(samples[base])
        };
        gray.push(value);
    }

    let mut sorted = gray.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let lo = percentile(&sorted, settings.normalize_bottom_percentile);
    let hi = percentile(&sorted, settings.normalize_top_percentile);
    let range = (hi - lo).max(f32::EPSILON);

    let out: Vec<u8> = gray
        .iter()
        .map(|&v| (((v - lo) / range).clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();

    Image::new(dims, 1, BitDepth::Eight, out, image.pixel_size_um())
}

fn percentile(sorted: &[f32], pct: f64) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let rank = (pct / 100.0) * ((sorted.len() - 1) as f64);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = (rank - rank.floor()) as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use scipathj_types::Point;

    struct StubDetector {
        polygons: Vec<DetectedNucleus>,
    }

    impl NucleusDetector for StubDetector {
        fn detect(&self, _image: &Image) -> Result<Vec<DetectedNucleus>, DetectorError> {
            Ok(self.polygons.clone())
        }
    }

    struct FailingDetector;
    impl NucleusDetector for FailingDetector {
        fn detect(&self, _image: &Image) -> Result<Vec<DetectedNucleus>, DetectorError> {
            Err(DetectorError::Tile {
                x: 0,
                y: 0,
                message: "boom".to_string(),
            })
        }
    }

    fn square(x0: f32, y0: f32, side: f32) -> Polygon {
        Polygon::new(vec![
            Point::new(x0, y0),
            Point::new(x0 + side, y0),
            Point::new(x0 + side, y0 + side),
            Point::new(x0, y0 + side),
        ])
        .unwrap()
    }

    fn small_image(width: u32, height: u32) -> Image {
        Image::new(
            Dimensions::new(width, height),
            3,
            BitDepth::Eight,
            vec![128; (width * height * 3) as usize],
            None,
        )
    }

    #[test]
    fn failing_detector_yields_no_nuclei_without_panicking() {
        let image = small_image(50, 50);
        let nuclei = detect_nuclei(&FailingDetector, &image, &NuclearSegmentationSettings::default());
        assert!(nuclei.is_empty());
    }

    #[test]
    fn single_polygon_above_threshold_survives() {
        let image = small_image(50, 50);
        let detector = StubDetector {
            polygons: vec![DetectedNucleus {
                polygon: square(10.0, 10.0, 10.0),
                probability: 0.9,
            }],
        };
        let nuclei = detect_nuclei(&detector, &image, &NuclearSegmentationSettings::default());
        assert_eq!(nuclei.len(), 1);
    }

    #[test]
    fn low_probability_polygon_is_filtered() {
        let image = small_image(50, 50);
        let detector = StubDetector {
            polygons: vec![DetectedNucleus {
                polygon: square(10.0, 10.0, 10.0),
                probability: 0.1,
            }],
        };
        let mut settings = NuclearSegmentationSettings::default();
        settings.prob_threshold = 0.5;
        let nuclei = detect_nuclei(&detector, &image, &settings);
        assert!(nuclei.is_empty());
    }

    #[test]
    fn overlapping_detections_are_suppressed_to_one() {
        let image = small_image(50, 50);
        let detector = StubDetector {
            polygons: vec![
                DetectedNucleus {
                    polygon: square(10.0, 10.0, 10.0),
                    probability: 0.9,
                },
                DetectedNucleus {
                    polygon: square(11.0, 10.0, 10.0),
                    probability: 0.8,
                },
            ],
        };
        let mut settings = NuclearSegmentationSettings::default();
        settings.nms_threshold = 0.3;
        let nuclei = detect_nuclei(&detector, &image, &settings);
        assert_eq!(nuclei.len(), 1);
    }

    #[test]
    fn tiling_splits_large_images() {
        let image = small_image(200, 200);
        let tiles = tile_image(&image, 128);
        assert!(tiles.len() > 1);
        for tile in &tiles {
            assert!(tile.image.dimensions().width <= 128);
            assert!(tile.image.dimensions().height <= 128);
        }
    }

    #[test]
    fn percentile_normalization_produces_single_channel_image() {
        let image = small_image(10, 10);
        let normalized = normalize_percentiles(&image, &NuclearSegmentationSettings::default());
        assert_eq!(normalized.channels(), 1);
    }
}
