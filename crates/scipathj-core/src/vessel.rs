//! Vessel segmentation: threshold + morphology on a deconvolved channel,
//! then connected-component contour extraction.

use std::collections::VecDeque;

use image::{GrayImage, Luma};
use imageproc::morphology::{close, Norm};
use imageproc::region_labelling::{connected_components, Connectivity};
use scipathj_types::{OpticalDensityChannels, Point, Polygon, VesselSegmentationSettings};

use crate::error::CoreError;

/// One segmented vessel candidate. Components touching the image border
/// are retained (the spec leaves the decision of what to do with them to
/// the consumer) but flagged via `touches_border`.
#[derive(Debug, Clone)]
pub struct VesselSegment {
    pub polygon: Polygon,
    pub touches_border: bool,
    pub area: f64,
}

/// `segment(OpticalDensityChannels, VesselSegmentationSettings) -> [Polygon]`.
///
/// `threshold` semantics follow the spec literally: a pixel is foreground
/// when its value on the configured channel is `>= threshold`. For the
/// background channel (the default), this selects pixels with *high*
/// background optical density — regions that absorb little stain and
/// transmit little light, the appearance of an unstained vessel lumen.
///
/// An empty result is a valid outcome, never an error.
///
/// # Errors
/// Propagates [`scipathj_types::GeometryError::TooFewVertices`] (wrapped
/// as [`CoreError::Geometry`]) only in the pathological case where a
/// traced contour somehow yields fewer than 3 points after the caller has
/// already filtered degenerate contours — in practice this never surfaces
/// because such contours are skipped, not constructed.
pub fn segment(
    od: &OpticalDensityChannels,
    settings: &VesselSegmentationSettings,
) -> Result<Vec<VesselSegment>, CoreError> {
    let dims = od.dimensions();
    let width = dims.width;
    let height = dims.height;
    let channel = od.channel(settings.channel);

    let mut binary = GrayImage::new(width, height);
    for (i, &value) in channel.iter().enumerate() {
        let x = (i as u32) % width;
        let y = (i as u32) / width;
        let foreground = f64::from(value) >= settings.threshold;
        binary.put_pixel(x, y, Luma([u8::from(foreground) * 255]));
    }

    #[allow(clippy::cast_possible_truncation)]
    let radius = settings.closing_radius.round().clamp(0.0, 255.0) as u8;
    let closed = if radius == 0 {
        binary
    } else {
        close(&binary, Norm::LInf, radius)
    };

    let filled = fill_holes(&closed);

    let labels = connected_components(&filled, Connectivity::Eight, Luma([0u8]));
    let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0);

    let mut segments = Vec::new();
    for label in 1..=max_label {
        let mut coords: Vec<(u32, u32)> = Vec::new();
        for (x, y, p) in labels.enumerate_pixels() {
            if p.0[0] == label {
                coords.push((x, y));
            }
        }
        if coords.is_empty() {
            continue;
        }
        let area = coords.len() as f64;
        if area < settings.min_area || area > settings.max_area {
            continue;
        }

        let touches_border = coords
            .iter()
            .any(|&(x, y)| x == 0 || y == 0 || x == width - 1 || y == height - 1);

        let mut component_mask = GrayImage::new(width, height);
        for &(x, y) in &coords {
            component_mask.put_pixel(x, y, Luma([255]));
        }

        let contours = imageproc::contours::find_contours::<u32>(&component_mask);
        let Some(outer) = contours
            .into_iter()
            .filter(|c| matches!(c.border_type, imageproc::contours::BorderType::Outer))
            .max_by_key(|c| c.points.len())
        else {
            continue;
        };
        if outer.points.len() < 3 {
            continue;
        }

        #[allow(clippy::cast_precision_loss)]
        let points: Vec<Point> = outer
            .points
            .iter()
            .map(|p| Point::new(p.x as f32, p.y as f32))
            .collect();
        let polygon = Polygon::new(points)?;

        segments.push(VesselSegment {
            polygon,
            touches_border,
            area,
        });
    }

    segments.sort_by(|a, b| {
        b.area
            .partial_cmp(&a.area)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ca = a.polygon.centroid();
                let cb = b.polygon.centroid();
                ca.y.partial_cmp(&cb.y)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| ca.x.partial_cmp(&cb.x).unwrap_or(std::cmp::Ordering::Equal))
            })
    });

    Ok(segments)
}

/// Fills holes in a binary foreground mask: background pixels not
/// connected (4-way) to the image border become foreground.
fn fill_holes(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut reached = vec![false; (width * height) as usize];
    let mut queue = VecDeque::new();

    let idx = |x: u32, y: u32| (y * width + x) as usize;

    for x in 0..width {
        for &y in &[0, height.saturating_sub(1)] {
            if mask.get_pixel(x, y).0[0] == 0 && !reached[idx(x, y)] {
                reached[idx(x, y)] = true;
                queue.push_back((x, y));
            }
        }
    }
    for y in 0..height {
        for &x in &[0, width.saturating_sub(1)] {
            if mask.get_pixel(x, y).0[0] == 0 && !reached[idx(x, y)] {
                reached[idx(x, y)] = true;
                queue.push_back((x, y));
            }
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        let neighbors = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbors {
            if nx < width && ny < height && mask.get_pixel(nx, ny).0[0] == 0 && !reached[idx(nx, ny)] {
                reached[idx(nx, ny)] = true;
                queue.push_back((nx, ny));
            }
        }
    }

    let mut out = mask.clone();
    for y in 0..height {
        for x in 0..width {
            if mask.get_pixel(x, y).0[0] == 0 && !reached[idx(x, y)] {
                out.put_pixel(x, y, Luma([255]));
            }
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use scipathj_types::{Channel, Dimensions};

    fn uniform_od(width: u32, height: u32, value: f32) -> OpticalDensityChannels {
        let n = (width * height) as usize;
        OpticalDensityChannels::new(Dimensions::new(width, height), vec![value; n], vec![0.0; n], vec![0.0; n])
    }

    fn settings() -> VesselSegmentationSettings {
        VesselSegmentationSettings {
            channel: Channel::Hematoxylin,
            threshold: 0.5,
            min_area: 1.0,
            max_area: 1_000_000.0,
            closing_radius: 0.0,
        }
    }

    #[test]
    fn uniform_below_threshold_yields_no_vessels() {
        let od = uniform_od(20, 20, 0.1);
        let segments = segment(&od, &settings()).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn uniform_above_threshold_yields_no_vessels_touching_all_borders() {
        // An entirely-foreground image is a single border-touching component.
        let od = uniform_od(10, 10, 1.0);
        let segments = segment(&od, &settings()).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].touches_border);
    }

    #[test]
    fn isolated_square_blob_produces_one_interior_vessel() {
        let width = 30;
        let height = 30;
        let n = (width * height) as usize;
        let mut channel = vec![0.0_f32; n];
        for y in 10..20 {
            for x in 10..20 {
                channel[(y * width + x) as usize] = 1.0;
            }
        }
        let od = OpticalDensityChannels::new(
            Dimensions::new(width, height),
            channel,
            vec![0.0; n],
            vec![0.0; n],
        );
        let segments = segment(&od, &settings()).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].touches_border);
        assert!((segments[0].area - 100.0).abs() < 1.0);
    }

    #[test]
    fn area_filter_excludes_small_components() {
        let width = 20;
        let height = 20;
        let n = (width * height) as usize;
        let mut channel = vec![0.0_f32; n];
        channel[(5 * width + 5) as usize] = 1.0;
        let od = OpticalDensityChannels::new(
            Dimensions::new(width, height),
            channel,
            vec![0.0; n],
            vec![0.0; n],
        );
        let mut strict_settings = settings();
        strict_settings.min_area = 5.0;
        let segments = segment(&od, &strict_settings).unwrap();
        assert!(segments.is_empty());
    }
}
