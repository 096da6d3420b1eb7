//! CellConstructor: point-seeded Voronoi tessellation with vessel
//! exclusion and nucleus-cytoplasm pairing.

use geo::{BooleanOps, Contains, Coord, LineString, Point as GeoPoint};
use scipathj_types::{CytoplasmSegmentationSettings, Dimensions, GeometryError, Polygon, Rectangle};

use crate::error::CoreError;
use crate::geo_interop::{self, from_geo, to_geo, GeoMultiPolygon, GeoPolygon};
use crate::voronoi::{self, perturb_seeds};

/// Approximation order for capping a cytoplasm to a disk: a regular
/// 64-gon, as specified.
const DISK_SIDES: usize = 64;

/// `construct(nuclei, vessels, image_size) -> (cytoplasms, cells, cell_links)`.
#[derive(Debug, Clone, Default)]
pub struct CellConstructionResult {
    pub cytoplasms: Vec<Polygon>,
    pub cells: Vec<Polygon>,
    /// `(cell_idx, nucleus_idx, cytoplasm_idx)`; `cell_idx`/`cytoplasm_idx`
    /// index into the output vectors above, `nucleus_idx` into the input
    /// `nuclei` slice.
    pub cell_links: Vec<(usize, usize, usize)>,
}

/// # Errors
/// Returns [`CoreError::Geometry`] if a constructed cytoplasm or cell
/// polygon somehow has fewer than 3 vertices after clipping (only
/// possible for pathological near-zero-area degenerate geometry; such
/// seeds are instead treated as empty cytoplasms and skipped).
pub fn construct(
    nuclei: &[Polygon],
    vessels: &[Polygon],
    image_size: Dimensions,
    settings: &CytoplasmSegmentationSettings,
) -> Result<CellConstructionResult, CoreError> {
    if nuclei.is_empty() {
        return Ok(CellConstructionResult::default());
    }

    let bounds = Rectangle::new(0.0, 0.0, image_size.width as f32, image_size.height as f32);
    let raw_seeds: Vec<Coord<f64>> = nuclei.iter().map(|n| voronoi::point_to_coord(n.centroid())).collect();
    let seeds = perturb_seeds(&raw_seeds, bounds);
    let voronoi_cells = voronoi::cells(&seeds, bounds);

    let vessel_union = if settings.exclude_vessels {
        let inflated: Vec<GeoPolygon> = vessels
            .iter()
            .map(|v| inflate(&to_geo(v), settings.vessel_safety_margin))
            .collect();
        geo_interop::union_all(&inflated)
    } else {
        GeoMultiPolygon::new(vec![])
    };

    let mut cytoplasms = Vec::new();
    let mut cells = Vec::new();
    let mut cell_links = Vec::new();

    for (nucleus_idx, voronoi_cell) in voronoi_cells.into_iter().enumerate() {
        let seed = seeds[nucleus_idx];
        let excluded: GeoMultiPolygon = voronoi_cell.difference(&vessel_union);
        let Some(candidate) = largest_containing(&excluded, seed) else {
            // Fully excluded by vessels: no cytoplasm, no cell, but the
            // nucleus itself still exists independently of this result.
            continue;
        };

        let disk = disk_polygon(seed, settings.max_cytoplasm_radius, DISK_SIDES);
        let capped: GeoMultiPolygon = candidate.intersection(&disk);
        let Some(cytoplasm_geo) = largest_containing(&capped, seed) else {
            continue;
        };

        let cytoplasm = from_geo(&cytoplasm_geo)?;
        let nucleus_geo = to_geo(&nuclei[nucleus_idx]);
        let cell_union: GeoMultiPolygon = nucleus_geo.union(&GeoMultiPolygon::new(vec![cytoplasm_geo]));
        let Some(cell_geo) = largest_by_area(&cell_union) else {
            continue;
        };
        let cell = from_geo(&cell_geo)?;

        let cytoplasm_idx = cytoplasms.len();
        cytoplasms.push(cytoplasm);
        let cell_idx = cells.len();
        cells.push(cell);
        cell_links.push((cell_idx, nucleus_idx, cytoplasm_idx));
    }

    Ok(CellConstructionResult {
        cytoplasms,
        cells,
        cell_links,
    })
}

fn largest_containing(mp: &GeoMultiPolygon, seed: Coord<f64>) -> Option<GeoPolygon> {
    let point = GeoPoint::from(seed);
    mp.iter()
        .filter(|p| p.contains(&point))
        .max_by(|a, b| {
            geo_interop::area(a)
                .partial_cmp(&geo_interop::area(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
}

fn largest_by_area(mp: &GeoMultiPolygon) -> Option<GeoPolygon> {
    mp.iter()
        .max_by(|a, b| {
            geo_interop::area(a)
                .partial_cmp(&geo_interop::area(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned()
}

/// Regular `sides`-gon centered at `center` with the given `radius`,
/// approximating a disk — the spec's "64-gon" cap for
/// `max_cytoplasm_radius`.
fn disk_polygon(center: Coord<f64>, radius: f64, sides: usize) -> GeoPolygon {
    let coords: Vec<Coord<f64>> = (0..sides)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let angle = std::f64::consts::TAU * (i as f64) / (sides as f64);
            Coord {
                x: center.x + radius * angle.cos(),
                y: center.y + radius * angle.sin(),
            }
        })
        .collect();
    GeoPolygon::new(LineString::new(coords), vec![])
}

/// Expands a polygon outward by `margin` pixels via a per-vertex normal
/// offset (the average of the two adjacent edge outward normals). An
/// approximation of a true Minkowski-sum offset, adequate for the small
/// safety margins this setting is intended for; exact for `margin == 0.0`.
fn inflate(polygon: &GeoPolygon, margin: f64) -> GeoPolygon {
    if margin <= 0.0 {
        return polygon.clone();
    }
    let ring: Vec<Coord<f64>> = polygon.exterior().coords().copied().collect();
    let ring = if ring.len() > 1 && ring.first() == ring.last() {
        ring[..ring.len() - 1].to_vec()
    } else {
        ring
    };
    let n = ring.len();
    if n < 3 {
        return polygon.clone();
    }

    let outward_normal = |a: Coord<f64>, b: Coord<f64>| -> Coord<f64> {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let len = (dx * dx + dy * dy).sqrt().max(f64::EPSILON);
        // Outward for a counter-clockwise ring: rotate edge vector -90deg.
        Coord {
            x: dy / len,
            y: -dx / len,
        }
    };

    let inflated: Vec<Coord<f64>> = (0..n)
        .map(|i| {
            let prev = ring[(i + n - 1) % n];
            let curr = ring[i];
            let next = ring[(i + 1) % n];
            let n1 = outward_normal(prev, curr);
            let n2 = outward_normal(curr, next);
            let mut avg = Coord {
                x: n1.x + n2.x,
                y: n1.y + n2.y,
            };
            let len = (avg.x * avg.x + avg.y * avg.y).sqrt();
            if len > f64::EPSILON {
                avg.x /= len;
                avg.y /= len;
            }
            Coord {
                x: curr.x + avg.x * margin,
                y: curr.y + avg.y * margin,
            }
        })
        .collect();

    GeoPolygon::new(LineString::new(inflated), vec![])
}

#[must_use]
pub fn geometry_invariants_hold(result: &CellConstructionResult) -> Result<(), GeometryError> {
    for &(cell_idx, nucleus_idx, cytoplasm_idx) in &result.cell_links {
        if cytoplasm_idx >= result.cytoplasms.len() {
            return Err(GeometryError::DanglingCytoplasmLink {
                cell_id: cell_idx as u64,
                cytoplasm_id: cytoplasm_idx as u64,
            });
        }
        let _ = nucleus_idx;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use scipathj_types::Point;

    fn square(x0: f32, y0: f32, side: f32) -> Polygon {
        Polygon::new(vec![
            Point::new(x0, y0),
            Point::new(x0 + side, y0),
            Point::new(x0 + side, y0 + side),
            Point::new(x0, y0 + side),
        ])
        .unwrap()
    }

    fn settings() -> CytoplasmSegmentationSettings {
        CytoplasmSegmentationSettings {
            exclude_vessels: true,
            max_cytoplasm_radius: 1000.0,
            boundary_smoothing_factor: 0.0,
            vessel_safety_margin: 0.0,
        }
    }

    #[test]
    fn zero_seeds_yields_empty_result() {
        let result = construct(&[], &[], Dimensions::new(100, 100), &settings()).unwrap();
        assert!(result.cytoplasms.is_empty());
        assert!(result.cells.is_empty());
        assert!(result.cell_links.is_empty());
    }

    #[test]
    fn one_seed_no_vessels_yields_whole_rectangle_cytoplasm() {
        let nucleus = square(45.0, 45.0, 10.0);
        let result = construct(
            std::slice::from_ref(&nucleus),
            &[],
            Dimensions::new(100, 100),
            &settings(),
        )
        .unwrap();
        assert_eq!(result.cytoplasms.len(), 1);
        assert_eq!(result.cells.len(), 1);
        assert!((result.cytoplasms[0].area() - 10_000.0).abs() < 5.0);
    }

    #[test]
    fn two_seeds_produce_two_disjoint_cells() {
        let n1 = square(20.0, 45.0, 10.0);
        let n2 = square(70.0, 45.0, 10.0);
        let result = construct(&[n1, n2], &[], Dimensions::new(100, 100), &settings()).unwrap();
        assert_eq!(result.cytoplasms.len(), 2);
        assert_eq!(result.cells.len(), 2);
        assert_eq!(result.cell_links.len(), 2);
        for &(cell_idx, nucleus_idx, cytoplasm_idx) in &result.cell_links {
            assert_eq!(cell_idx, cytoplasm_idx);
            assert!(nucleus_idx < 2);
        }
    }

    #[test]
    fn cell_geometry_contains_nucleus_centroid() {
        let nucleus = square(45.0, 45.0, 10.0);
        let centroid = nucleus.centroid();
        let result = construct(
            std::slice::from_ref(&nucleus),
            &[],
            Dimensions::new(100, 100),
            &settings(),
        )
        .unwrap();
        assert!(result.cells[0].contains_point(centroid));
    }

    #[test]
    fn max_radius_caps_single_seed_cytoplasm() {
        let nucleus = square(45.0, 45.0, 10.0);
        let mut small_cap = settings();
        small_cap.max_cytoplasm_radius = 5.0;
        let result = construct(
            std::slice::from_ref(&nucleus),
            &[],
            Dimensions::new(1000, 1000),
            &small_cap,
        )
        .unwrap();
        // A disk of radius 5 has area pi*25 ~ 78.5, far less than the image.
        assert!(result.cytoplasms[0].area() < 100.0);
    }

    #[test]
    fn invariants_hold_reports_dangling_link() {
        let result = CellConstructionResult {
            cytoplasms: vec![],
            cells: vec![square(0.0, 0.0, 1.0)],
            cell_links: vec![(0, 0, 5)],
        };
        assert!(geometry_invariants_hold(&result).is_err());
    }
}
