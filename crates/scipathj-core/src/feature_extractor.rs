//! FeatureExtractor: derives Morphology, Intensity, and Spatial features
//! for one ROI.

use std::collections::HashMap;

use geo::{Area, ConvexHull};
use scipathj_types::{
    Category, Dimensions, FeatureExtractionSettings, FeatureValue, Geometry, OpticalDensityChannels, Point, Polygon,
    Rectangle, Roi,
};

use crate::geo_interop::{to_geo, GeoPolygon};
use crate::neighborhood::NeighborhoodIndex;

/// The four intensity sources the spec enumerates: the three deconvolved
/// optical-density channels plus the original grayscale image. Carried as
/// a dedicated enum (rather than reusing [`scipathj_types::Channel`],
/// which only names the three deconvolved channels) because grayscale has
/// no optical-density interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntensitySource {
    Hematoxylin,
    Eosin,
    Background,
    Grayscale,
}

impl IntensitySource {
    const ALL: [Self; 4] = [Self::Hematoxylin, Self::Eosin, Self::Background, Self::Grayscale];

    const fn name(self) -> &'static str {
        match self {
            Self::Hematoxylin => "hematoxylin",
            Self::Eosin => "eosin",
            Self::Background => "background",
            Self::Grayscale => "grayscale",
        }
    }

    const fn enabled(self, settings: &FeatureExtractionSettings) -> bool {
        match self {
            Self::Hematoxylin => settings.channels.hematoxylin,
            Self::Eosin => settings.channels.eosin,
            Self::Background => settings.channels.background,
            Self::Grayscale => settings.channels.grayscale,
        }
    }
}

/// `extract(Roi, OpticalDensityChannels, NeighborhoodIndex) -> {feature name -> value}`.
///
/// `grayscale` is the original image's luma raster, row-major, same
/// dimensions as `od` — an addition beyond the distilled signature needed
/// to back the spec's fourth intensity channel (see [`IntensitySource`]).
///
/// An ROI with zero geometric area yields `NaN` for every ratio or
/// moment-derived feature rather than failing; this function never
/// returns an error.
#[must_use]
pub fn extract(
    roi: &Roi,
    od: &OpticalDensityChannels,
    grayscale: &[f32],
    index: &NeighborhoodIndex,
    settings: &FeatureExtractionSettings,
) -> HashMap<String, FeatureValue> {
    let mut features = HashMap::new();
    let geometry = roi.geometry();
    let geo_polygon = geometry_to_geo(geometry);

    if settings.groups.morphology {
        insert_morphology(&mut features, geometry, &geo_polygon);
    }

    if settings.groups.intensity {
        let dims = od.dimensions();
        let pixels = rasterize(geometry, dims);
        for source in IntensitySource::ALL {
            if !source.enabled(settings) {
                continue;
            }
            let samples = sample(source, od, grayscale, dims, &pixels);
            insert_intensity(&mut features, source.name(), &samples, geo_polygon.unsigned_area());
        }
    }

    if settings.groups.spatial {
        insert_spatial(&mut features, roi, index, f64::from(settings.neighbor_radius));
    }

    features
}

fn set(features: &mut HashMap<String, FeatureValue>, name: &str, value: f64) {
    features.insert(name.to_string(), FeatureValue::Number(value));
}

fn geometry_to_geo(geometry: &Geometry) -> GeoPolygon {
    match geometry {
        Geometry::Polygon(p) => to_geo(p),
        Geometry::Rectangle(r) => {
            let rect_poly = rectangle_to_polygon(*r);
            to_geo(&rect_poly)
        }
    }
}

fn rectangle_to_polygon(r: Rectangle) -> Polygon {
    #[allow(clippy::expect_used)]
    Polygon::new(vec![
        Point::new(r.x, r.y),
        Point::new(r.x + r.width, r.y),
        Point::new(r.x + r.width, r.y + r.height),
        Point::new(r.x, r.y + r.height),
    ])
    .expect("a non-degenerate rectangle always yields 4 distinct vertices")
}

fn insert_morphology(features: &mut HashMap<String, FeatureValue>, geometry: &Geometry, geo_polygon: &GeoPolygon) {
    let bounds = geometry.bounds();
    set(features, "bbox_x", f64::from(bounds.x));
    set(features, "bbox_y", f64::from(bounds.y));
    set(features, "bbox_width", f64::from(bounds.width));
    set(features, "bbox_height", f64::from(bounds.height));

    let area = geo_polygon.unsigned_area();
    set(features, "area", area);

    let perimeter = ring_perimeter(geo_polygon);
    set(features, "perimeter", perimeter);

    let (major, minor) = ellipse_axes(geo_polygon, area);
    set(features, "major_axis_length", major);
    set(features, "minor_axis_length", minor);

    let circularity = if perimeter > f64::EPSILON {
        4.0 * std::f64::consts::PI * area / (perimeter * perimeter)
    } else {
        f64::NAN
    };
    set(features, "circularity", circularity);

    let aspect_ratio = if minor > f64::EPSILON { major / minor } else { f64::NAN };
    set(features, "aspect_ratio", aspect_ratio);

    let roundness = if major > f64::EPSILON {
        4.0 * area / (std::f64::consts::PI * major * major)
    } else {
        f64::NAN
    };
    set(features, "roundness", roundness);

    let hull = geo_polygon.convex_hull();
    let hull_area = hull.unsigned_area();
    let solidity = if hull_area > f64::EPSILON { area / hull_area } else { f64::NAN };
    set(features, "solidity", solidity);

    let (feret, feret_angle, min_feret) = feret_measurements(&hull);
    set(features, "feret_diameter", feret);
    set(features, "min_feret", min_feret);
    set(features, "feret_angle", feret_angle);
}

fn ring_perimeter(polygon: &GeoPolygon) -> f64 {
    let coords: Vec<geo::Coord<f64>> = polygon.exterior().coords().copied().collect();
    let n = coords.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let a = coords[i];
            let b = coords[(i + 1) % n];
            ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
        })
        .sum()
}

/// Lengths of the major/minor axes of the ellipse sharing the polygon's
/// area and second moments, following the convention `length = 4*sqrt(eigenvalue)`
/// of the normalized inertia tensor (the same formula `skimage.regionprops`
/// uses for `major_axis_length`/`minor_axis_length`).
fn ellipse_axes(polygon: &GeoPolygon, area: f64) -> (f64, f64) {
    if area < f64::EPSILON {
        return (f64::NAN, f64::NAN);
    }
    let coords: Vec<geo::Coord<f64>> = polygon.exterior().coords().copied().collect();
    let n = coords.len();
    if n < 2 {
        return (f64::NAN, f64::NAN);
    }

    let signed_area = shoelace_signed_area(&coords);
    if signed_area.abs() < f64::EPSILON {
        return (f64::NAN, f64::NAN);
    }

    let (cx, cy) = centroid(&coords, signed_area);

    let mut ixx = 0.0;
    let mut iyy = 0.0;
    let mut ixy = 0.0;
    for i in 0..n {
        let a = coords[i];
        let b = coords[(i + 1) % n];
        let cross = a.x * b.y - b.x * a.y;
        ixx += (a.y * a.y + a.y * b.y + b.y * b.y) * cross;
        iyy += (a.x * a.x + a.x * b.x + b.x * b.x) * cross;
        ixy += (a.x * b.y + 2.0 * a.x * a.y + 2.0 * b.x * b.y + b.x * a.y) * cross;
    }
    ixx /= 12.0;
    iyy /= 12.0;
    ixy /= 24.0;

    let mu_xx = (iyy / signed_area - cx * cx).max(0.0);
    let mu_yy = (ixx / signed_area - cy * cy).max(0.0);
    let mu_xy = ixy / signed_area - cx * cy;

    let trace = mu_xx + mu_yy;
    let diff = mu_xx - mu_yy;
    let discriminant = (diff * diff / 4.0 + mu_xy * mu_xy).max(0.0).sqrt();
    let lambda_max = (trace / 2.0 + discriminant).max(0.0);
    let lambda_min = (trace / 2.0 - discriminant).max(0.0);

    (4.0 * lambda_max.sqrt(), 4.0 * lambda_min.sqrt())
}

fn shoelace_signed_area(coords: &[geo::Coord<f64>]) -> f64 {
    let n = coords.len();
    let mut sum = 0.0;
    for i in 0..n {
        let a = coords[i];
        let b = coords[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

fn centroid(coords: &[geo::Coord<f64>], signed_area: f64) -> (f64, f64) {
    let n = coords.len();
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..n {
        let a = coords[i];
        let b = coords[(i + 1) % n];
        let cross = a.x * b.y - b.x * a.y;
        cx += (a.x + b.x) * cross;
        cy += (a.y + b.y) * cross;
    }
    let factor = 1.0 / (6.0 * signed_area);
    (cx * factor, cy * factor)
}

/// `(max feret diameter, feret angle in degrees within [0, 180), min feret)`
/// over the convex hull, via brute-force max-pair distance and rotating
/// calipers over hull edge directions for the minimum width.
fn feret_measurements(hull: &GeoPolygon) -> (f64, f64, f64) {
    let coords: Vec<geo::Coord<f64>> = hull.exterior().coords().copied().collect();
    let points: Vec<geo::Coord<f64>> = if coords.len() > 1 && coords.first() == coords.last() {
        coords[..coords.len() - 1].to_vec()
    } else {
        coords
    };
    let n = points.len();
    if n < 2 {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    if n == 2 {
        let dx = points[1].x - points[0].x;
        let dy = points[1].y - points[0].y;
        let dist = (dx * dx + dy * dy).sqrt();
        let angle = dy.atan2(dx).to_degrees().rem_euclid(180.0);
        return (dist, angle, 0.0);
    }

    let mut max_dist = 0.0;
    let mut max_angle = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = points[j].x - points[i].x;
            let dy = points[j].y - points[i].y;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > max_dist {
                max_dist = dist;
                max_angle = dy.atan2(dx).to_degrees().rem_euclid(180.0);
            }
        }
    }

    let mut min_width = f64::MAX;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let len = (dx * dx + dy * dy).sqrt();
        if len < f64::EPSILON {
            continue;
        }
        let (nx, ny) = (-dy / len, dx / len);
        let mut min_proj = f64::MAX;
        let mut max_proj = f64::MIN;
        for p in &points {
            let proj = p.x * nx + p.y * ny;
            min_proj = min_proj.min(proj);
            max_proj = max_proj.max(proj);
        }
        min_width = min_width.min(max_proj - min_proj);
    }

    (max_dist, max_angle, min_width)
}

/// Pixel coordinates inside `geometry`, clamped to `dims`, via scanline
/// rasterization.
fn rasterize(geometry: &Geometry, dims: Dimensions) -> Vec<(u32, u32)> {
    let bounds = geometry.bounds();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let y0 = (f64::from(bounds.y).floor().max(0.0)) as i64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let y1 = (f64::from(bounds.y + bounds.height).ceil().min(f64::from(dims.height))) as i64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let x0 = (f64::from(bounds.x).floor().max(0.0)) as i64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let x1 = (f64::from(bounds.x + bounds.width).ceil().min(f64::from(dims.width))) as i64;

    let mut pixels = Vec::new();
    for y in y0.max(0)..y1.max(0) {
        for x in x0.max(0)..x1.max(0) {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let p = Point::new(x as f32 + 0.5, y as f32 + 0.5);
            if geometry.contains_point_approx(p) {
                pixels.push((x as u32, y as u32));
            }
        }
    }
    pixels
}

fn sample(
    source: IntensitySource,
    od: &OpticalDensityChannels,
    grayscale: &[f32],
    dims: Dimensions,
    pixels: &[(u32, u32)],
) -> Vec<f64> {
    let width = dims.width as usize;
    pixels
        .iter()
        .map(|&(x, y)| {
            let idx = (y as usize) * width + (x as usize);
            f64::from(match source {
                IntensitySource::Hematoxylin => od.hematoxylin()[idx],
                IntensitySource::Eosin => od.eosin()[idx],
                IntensitySource::Background => od.background()[idx],
                IntensitySource::Grayscale => grayscale[idx],
            })
        })
        .collect()
}

fn insert_intensity(features: &mut HashMap<String, FeatureValue>, prefix: &str, samples: &[f64], geo_area: f64) {
    let key = |suffix: &str| format!("{prefix}_{suffix}");
    if samples.is_empty() {
        for suffix in [
            "mean",
            "std_dev",
            "median",
            "mode",
            "min",
            "max",
            "skewness",
            "kurtosis",
            "p5",
            "p95",
            "integrated_density",
            "raw_integrated_density",
        ] {
            set(features, &key(suffix), f64::NAN);
        }
        return;
    }

    let n = samples.len();
    #[allow(clippy::cast_precision_loss)]
    let count = n as f64;
    let sum: f64 = samples.iter().sum();
    let mean = sum / count;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    let std_dev = variance.sqrt();

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = percentile(&sorted, 50.0);
    let p5 = percentile(&sorted, 5.0);
    let p95 = percentile(&sorted, 95.0);
    let min = sorted[0];
    let max = sorted[n - 1];
    let mode = mode_256_bins(&sorted, min, max);

    let (skewness, kurtosis) = if std_dev > f64::EPSILON {
        let m3 = samples.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / count;
        let m4 = samples.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / count;
        (m3 / std_dev.powi(3), m4 / std_dev.powi(4) - 3.0)
    } else {
        (f64::NAN, f64::NAN)
    };

    set(features, &key("mean"), mean);
    set(features, &key("std_dev"), std_dev);
    set(features, &key("median"), median);
    set(features, &key("mode"), mode);
    set(features, &key("min"), min);
    set(features, &key("max"), max);
    set(features, &key("skewness"), skewness);
    set(features, &key("kurtosis"), kurtosis);
    set(features, &key("p5"), p5);
    set(features, &key("p95"), p95);
    set(features, &key("integrated_density"), geo_area * mean);
    set(features, &key("raw_integrated_density"), sum);
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    #[allow(clippy::cast_precision_loss)]
    let rank = (pct / 100.0) * ((sorted.len() - 1) as f64);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - rank.floor();
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

fn mode_256_bins(sorted: &[f64], min: f64, max: f64) -> f64 {
    let range = max - min;
    if range < f64::EPSILON {
        return min;
    }
    const BINS: usize = 256;
    let mut counts = [0u32; BINS];
    for &v in sorted {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bin = (((v - min) / range) * (BINS as f64 - 1.0)).round() as usize;
        counts[bin.min(BINS - 1)] += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let (best_bin, _) = counts.iter().enumerate().max_by_key(|&(_, c)| *c).unwrap_or((0, &0));
    min + (best_bin as f64 / (BINS as f64 - 1.0)) * range
}

fn insert_spatial(
    features: &mut HashMap<String, FeatureValue>,
    roi: &Roi,
    index: &NeighborhoodIndex,
    neighbor_radius: f64,
) {
    let centroid = roi.centroid();
    set(features, "centroid_x", f64::from(centroid.x));
    set(features, "centroid_y", f64::from(centroid.y));

    match index.nearest_vessel(centroid) {
        Some((distance, vessel_idx)) => {
            set(features, "nearest_vessel_distance", distance);
            #[allow(clippy::cast_precision_loss)]
            set(features, "nearest_vessel_index", vessel_idx as f64);
        }
        None => {
            set(features, "nearest_vessel_distance", f64::NAN);
            set(features, "nearest_vessel_index", -1.0);
        }
    }

    let count = index.neighbor_count(centroid, roi.category(), roi.id(), neighbor_radius);
    #[allow(clippy::cast_precision_loss)]
    set(features, "neighbor_count", count as f64);

    let nearest = index
        .nearest_neighbor_distance(centroid, roi.category(), roi.id())
        .unwrap_or(f64::NAN);
    set(features, "nearest_neighbor_distance", nearest);
}

/// Extension used only by rasterization: an even-odd point test that
/// tolerates the `Geometry` enum without exposing its variants here.
trait ContainsApprox {
    fn contains_point_approx(&self, p: Point) -> bool;
}

impl ContainsApprox for Geometry {
    fn contains_point_approx(&self, p: Point) -> bool {
        match self {
            Self::Polygon(poly) => poly.contains_point(p),
            Self::Rectangle(r) => r.contains_point(p),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use scipathj_types::{BitDepth, ChannelEnable, Dimensions, FeatureGroups};

    fn square_roi(side: f32) -> Roi {
        let poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(side, 0.0),
            Point::new(side, side),
            Point::new(0.0, side),
        ])
        .unwrap();
        Roi::new(1, "img", "img_nucleus_0", Category::Nucleus, Geometry::Polygon(poly))
    }

    fn uniform_od(width: u32, height: u32, value: f32) -> OpticalDensityChannels {
        let n = (width * height) as usize;
        OpticalDensityChannels::new(Dimensions::new(width, height), vec![value; n], vec![value; n], vec![value; n])
    }

    #[test]
    fn square_has_circularity_below_one_and_matches_area() {
        let roi = square_roi(10.0);
        let od = uniform_od(20, 20, 0.5);
        let grayscale = vec![0.5_f32; 400];
        let index = NeighborhoodIndex::build(&[], &[]);
        let features = extract(&roi, &od, &grayscale, &index, &FeatureExtractionSettings::default());
        let area = features["area"].as_f64().unwrap();
        assert!((area - 100.0).abs() < 1e-6);
        let circularity = features["circularity"].as_f64().unwrap();
        assert!(circularity > 0.5 && circularity < 1.0);
    }

    #[test]
    fn uniform_intensity_yields_zero_std_dev() {
        let roi = square_roi(10.0);
        let od = uniform_od(20, 20, 0.7);
        let grayscale = vec![0.7_f32; 400];
        let index = NeighborhoodIndex::build(&[], &[]);
        let features = extract(&roi, &od, &grayscale, &index, &FeatureExtractionSettings::default());
        assert!((features["hematoxylin_std_dev"].as_f64().unwrap()).abs() < 1e-9);
        assert!((features["hematoxylin_mean"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn disabled_groups_are_omitted() {
        let roi = square_roi(10.0);
        let od = uniform_od(20, 20, 0.5);
        let grayscale = vec![0.5_f32; 400];
        let index = NeighborhoodIndex::build(&[], &[]);
        let mut settings = FeatureExtractionSettings::default();
        settings.groups = FeatureGroups {
            morphology: false,
            intensity: true,
            spatial: false,
        };
        let features = extract(&roi, &od, &grayscale, &index, &settings);
        assert!(!features.contains_key("area"));
        assert!(!features.contains_key("centroid_x"));
        assert!(features.contains_key("hematoxylin_mean"));
    }

    #[test]
    fn single_channel_selection_only_emits_that_prefix() {
        let roi = square_roi(10.0);
        let od = uniform_od(20, 20, 0.5);
        let grayscale = vec![0.5_f32; 400];
        let index = NeighborhoodIndex::build(&[], &[]);
        let mut settings = FeatureExtractionSettings::default();
        settings.channels = ChannelEnable {
            hematoxylin: true,
            eosin: false,
            background: false,
            grayscale: false,
        };
        let features = extract(&roi, &od, &grayscale, &index, &settings);
        assert!(features.contains_key("hematoxylin_mean"));
        assert!(!features.contains_key("eosin_mean"));
        assert!(!features.contains_key("grayscale_mean"));
    }

    #[test]
    fn spatial_features_use_centroid_and_vessel_distance() {
        let roi = square_roi(10.0);
        let od = uniform_od(20, 20, 0.5);
        let grayscale = vec![0.5_f32; 400];
        let vessel = Polygon::new(vec![
            Point::new(100.0, 100.0),
            Point::new(110.0, 100.0),
            Point::new(110.0, 110.0),
            Point::new(100.0, 110.0),
        ])
        .unwrap();
        let index = NeighborhoodIndex::build(&[], std::slice::from_ref(&vessel));
        let features = extract(&roi, &od, &grayscale, &index, &FeatureExtractionSettings::default());
        assert_eq!(features["centroid_x"].as_f64().unwrap(), 5.0);
        assert!(features["nearest_vessel_distance"].as_f64().unwrap() > 0.0);
    }
}
