//! Point-seeded Voronoi tessellation via half-plane intersection, clipped
//! to a bounding rectangle.
//!
//! Each cell is built by intersecting the bounding rectangle with the
//! half-plane "closer to this seed than to seed j" for every other seed
//! j, using Sutherland-Hodgman polygon clipping. This is O(N) clips of
//! O(1)-ish vertex count per cell, O(N^2) overall in the seed count —
//! adequate for the moderate nucleus counts this pipeline targets; a
//! sweep-line (Fortune's algorithm) implementation would be O(N log N)
//! but is significantly harder to get right without a build/test loop.
//!
//! Ties are broken by lower seed index: coincident or exactly-symmetric
//! seeds are given a deterministic, index-derived infinitesimal offset
//! before clipping (symbolic perturbation), so the clip boundary always
//! resolves consistently rather than producing degenerate output.

use geo::{Coord, LineString};
use scipathj_types::{Point, Rectangle};

use crate::geo_interop::GeoPolygon;

/// Perturbation scale relative to the bounding rectangle's diagonal;
/// small enough to be visually negligible, large enough to survive
/// `f64` rounding in the clip arithmetic.
const PERTURBATION_EPSILON: f64 = 1e-9;

/// Applies a deterministic, index-derived offset to each seed so that
/// coincident seeds or exact symmetry never produce an ambiguous
/// bisector. The offset is a function of `(index, diagonal)` only, never
/// of wall-clock time or randomness, to preserve feature determinism.
#[must_use]
pub fn perturb_seeds(seeds: &[Coord<f64>], bounds: Rectangle) -> Vec<Coord<f64>> {
    let diagonal = (f64::from(bounds.width).powi(2) + f64::from(bounds.height).powi(2)).sqrt();
    let scale = diagonal * PERTURBATION_EPSILON;
    seeds
        .iter()
        .enumerate()
        .map(|(i, s)| {
            #[allow(clippy::cast_precision_loss)]
            let i = i as f64;
            Coord {
                x: s.x + scale * (i + 1.0).recip(),
                y: s.y + scale * (i + 2.0).recip(),
            }
        })
        .collect()
}

/// Computes one Voronoi cell per seed, clipped to `bounds`. Returns a
/// vector the same length as `seeds`; zero seeds yields an empty vector.
#[must_use]
pub fn cells(seeds: &[Coord<f64>], bounds: Rectangle) -> Vec<GeoPolygon> {
    if seeds.is_empty() {
        return Vec::new();
    }
    let rect = rectangle_ring(bounds);
    seeds
        .iter()
        .enumerate()
        .map(|(i, &seed)| {
            let mut ring = rect.clone();
            for (j, &other) in seeds.iter().enumerate() {
                if i == j {
                    continue;
                }
                ring = clip_halfplane(&ring, seed, other);
                if ring.is_empty() {
                    break;
                }
            }
            GeoPolygon::new(LineString::new(ring), vec![])
        })
        .collect()
}

fn rectangle_ring(bounds: Rectangle) -> Vec<Coord<f64>> {
    let x0 = f64::from(bounds.x);
    let y0 = f64::from(bounds.y);
    let x1 = x0 + f64::from(bounds.width);
    let y1 = y0 + f64::from(bounds.height);
    vec![
        Coord { x: x0, y: y0 },
        Coord { x: x1, y: y0 },
        Coord { x: x1, y: y1 },
        Coord { x: x0, y: y1 },
    ]
}

/// Clips a convex polygon (given as a ring, no repeated closing vertex)
/// to the half-plane of points at least as close to `keep_seed` as to
/// `other_seed`, via Sutherland-Hodgman clipping.
fn clip_halfplane(ring: &[Coord<f64>], keep_seed: Coord<f64>, other_seed: Coord<f64>) -> Vec<Coord<f64>> {
    if ring.is_empty() {
        return Vec::new();
    }
    let signed_distance = |p: Coord<f64>| -> f64 {
        let dx = other_seed.x - keep_seed.x;
        let dy = other_seed.y - keep_seed.y;
        let rhs = other_seed.x.mul_add(other_seed.x, other_seed.y * other_seed.y)
            - keep_seed.x.mul_add(keep_seed.x, keep_seed.y * keep_seed.y);
        rhs - 2.0 * (p.x * dx + p.y * dy)
    };

    let mut output = Vec::with_capacity(ring.len() + 1);
    let n = ring.len();
    for i in 0..n {
        let current = ring[i];
        let next = ring[(i + 1) % n];
        let d_current = signed_distance(current);
        let d_next = signed_distance(next);

        if d_current >= 0.0 {
            output.push(current);
        }
        if (d_current >= 0.0) != (d_next >= 0.0) {
            let t = d_current / (d_current - d_next);
            output.push(Coord {
                x: current.x + t * (next.x - current.x),
                y: current.y + t * (next.y - current.y),
            });
        }
    }
    output
}

#[must_use]
pub fn point_to_coord(p: Point) -> Coord<f64> {
    Coord {
        x: f64::from(p.x),
        y: f64::from(p.y),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use geo::Area;

    fn bounds(w: f32, h: f32) -> Rectangle {
        Rectangle::new(0.0, 0.0, w, h)
    }

    #[test]
    fn zero_seeds_yields_empty_cells() {
        assert!(cells(&[], bounds(100.0, 100.0)).is_empty());
    }

    #[test]
    fn one_seed_yields_whole_rectangle() {
        let seeds = vec![Coord { x: 50.0, y: 50.0 }];
        let result = cells(&seeds, bounds(100.0, 100.0));
        assert_eq!(result.len(), 1);
        assert!((result[0].unsigned_area() - 10_000.0).abs() < 1.0);
    }

    #[test]
    fn two_seeds_split_the_rectangle_in_half() {
        let seeds = vec![Coord { x: 25.0, y: 50.0 }, Coord { x: 75.0, y: 50.0 }];
        let result = cells(&seeds, bounds(100.0, 100.0));
        assert_eq!(result.len(), 2);
        let total: f64 = result.iter().map(geo::Area::unsigned_area).sum();
        assert!((total - 10_000.0).abs() < 1.0);
        // Each half should be roughly 5000.
        assert!((result[0].unsigned_area() - 5_000.0).abs() < 10.0);
        assert!((result[1].unsigned_area() - 5_000.0).abs() < 10.0);
    }

    #[test]
    fn cells_are_pairwise_disjoint_in_area() {
        let seeds = vec![
            Coord { x: 20.0, y: 20.0 },
            Coord { x: 80.0, y: 20.0 },
            Coord { x: 50.0, y: 80.0 },
        ];
        let result = cells(&seeds, bounds(100.0, 100.0));
        let total: f64 = result.iter().map(geo::Area::unsigned_area).sum();
        assert!((total - 10_000.0).abs() < 1.0);
    }

    #[test]
    fn coincident_seeds_do_not_panic_or_vanish() {
        let seeds = vec![Coord { x: 50.0, y: 50.0 }, Coord { x: 50.0, y: 50.0 }];
        let perturbed = perturb_seeds(&seeds, bounds(100.0, 100.0));
        let result = cells(&perturbed, bounds(100.0, 100.0));
        assert_eq!(result.len(), 2);
        for cell in &result {
            assert!(cell.unsigned_area() > 0.0);
        }
    }
}
