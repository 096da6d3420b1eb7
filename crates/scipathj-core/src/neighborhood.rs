//! Spatial index over ROI centroids and vessel boundaries, backing the
//! Spatial feature group with O(log N) nearest-neighbor queries.

use geo::{Contains, Line};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use scipathj_types::{Category, Point, Polygon};

use crate::geo_interop::to_geo;

type CentroidEntry = GeomWithData<[f64; 2], (u64, Category)>;
type BoundarySegment = GeomWithData<Line<f64>, usize>;

/// Built once per image from the current ROI set and vessel polygons;
/// immutable for the lifetime of feature extraction.
pub struct NeighborhoodIndex {
    centroids: RTree<CentroidEntry>,
    vessel_boundaries: RTree<BoundarySegment>,
    vessels: Vec<Polygon>,
}

impl NeighborhoodIndex {
    #[must_use]
    pub fn build(roi_centroids: &[(u64, Category, Point)], vessels: &[Polygon]) -> Self {
        let centroid_entries: Vec<CentroidEntry> = roi_centroids
            .iter()
            .map(|&(id, category, p)| GeomWithData::new([f64::from(p.x), f64::from(p.y)], (id, category)))
            .collect();

        let mut boundary_entries = Vec::new();
        for (vessel_idx, vessel) in vessels.iter().enumerate() {
            let verts = vessel.vertices();
            let n = verts.len();
            for i in 0..n {
                let a = verts[i];
                let b = verts[(i + 1) % n];
                let line = Line::new(
                    geo::Coord {
                        x: f64::from(a.x),
                        y: f64::from(a.y),
                    },
                    geo::Coord {
                        x: f64::from(b.x),
                        y: f64::from(b.y),
                    },
                );
                boundary_entries.push(GeomWithData::new(line, vessel_idx));
            }
        }

        Self {
            centroids: RTree::bulk_load(centroid_entries),
            vessel_boundaries: RTree::bulk_load(boundary_entries),
            vessels: vessels.to_vec(),
        }
    }

    /// `(distance, vessel_index)` to the nearest vessel boundary, or
    /// distance `0.0` if `point` is inside a vessel. `None` if there are
    /// no vessels at all.
    #[must_use]
    pub fn nearest_vessel(&self, point: Point) -> Option<(f64, usize)> {
        for (idx, vessel) in self.vessels.iter().enumerate() {
            if vessel.contains_point(point) {
                return Some((0.0, idx));
            }
        }
        use rstar::PointDistance;
        let query = [f64::from(point.x), f64::from(point.y)];
        self.vessel_boundaries
            .nearest_neighbor(&query)
            .map(|entry| (entry.distance_2(&query).sqrt(), entry.data))
    }

    /// Count of centroids of `category` (excluding `exclude_id`) within
    /// `radius` pixels of `point`.
    #[must_use]
    pub fn neighbor_count(&self, point: Point, category: Category, exclude_id: u64, radius: f64) -> usize {
        let query = [f64::from(point.x), f64::from(point.y)];
        self.centroids
            .locate_within_distance(query, radius * radius)
            .filter(|entry| entry.data.1 == category && entry.data.0 != exclude_id)
            .count()
    }

    /// Distance to the nearest other centroid of the same `category`, or
    /// `None` if no other centroid of that category exists.
    #[must_use]
    pub fn nearest_neighbor_distance(&self, point: Point, category: Category, exclude_id: u64) -> Option<f64> {
        use rstar::PointDistance;
        let query = [f64::from(point.x), f64::from(point.y)];
        self.centroids
            .nearest_neighbor_iter(&query)
            .find(|entry| entry.data.1 == category && entry.data.0 != exclude_id)
            .map(|entry| entry.distance_2(&query).sqrt())
    }

    #[must_use]
    pub fn contains_geo(&self, vessel_idx: usize, point: &geo::Point<f64>) -> bool {
        self.vessels
            .get(vessel_idx)
            .is_some_and(|v| to_geo(v).contains(point))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use scipathj_types::Point as P;

    fn square(x0: f32, y0: f32, side: f32) -> Polygon {
        Polygon::new(vec![
            P::new(x0, y0),
            P::new(x0 + side, y0),
            P::new(x0 + side, y0 + side),
            P::new(x0, y0 + side),
        ])
        .unwrap()
    }

    #[test]
    fn no_vessels_yields_no_nearest_vessel() {
        let index = NeighborhoodIndex::build(&[], &[]);
        assert!(index.nearest_vessel(P::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn point_inside_vessel_has_zero_distance() {
        let vessel = square(0.0, 0.0, 20.0);
        let index = NeighborhoodIndex::build(&[], std::slice::from_ref(&vessel));
        let (dist, idx) = index.nearest_vessel(P::new(10.0, 10.0)).unwrap();
        assert_eq!(dist, 0.0);
        assert_eq!(idx, 0);
    }

    #[test]
    fn point_outside_vessel_has_positive_distance() {
        let vessel = square(0.0, 0.0, 20.0);
        let index = NeighborhoodIndex::build(&[], std::slice::from_ref(&vessel));
        let (dist, _) = index.nearest_vessel(P::new(30.0, 10.0)).unwrap();
        assert!((dist - 10.0).abs() < 1e-6);
    }

    #[test]
    fn neighbor_count_respects_category_and_radius() {
        let centroids = vec![
            (1, Category::Nucleus, P::new(0.0, 0.0)),
            (2, Category::Nucleus, P::new(5.0, 0.0)),
            (3, Category::Nucleus, P::new(100.0, 0.0)),
            (4, Category::Vessel, P::new(5.0, 0.0)),
        ];
        let index = NeighborhoodIndex::build(&centroids, &[]);
        let count = index.neighbor_count(P::new(0.0, 0.0), Category::Nucleus, 1, 10.0);
        assert_eq!(count, 1);
    }

    #[test]
    fn nearest_neighbor_distance_excludes_self() {
        let centroids = vec![
            (1, Category::Nucleus, P::new(0.0, 0.0)),
            (2, Category::Nucleus, P::new(5.0, 0.0)),
        ];
        let index = NeighborhoodIndex::build(&centroids, &[]);
        let dist = index
            .nearest_neighbor_distance(P::new(0.0, 0.0), Category::Nucleus, 1)
            .unwrap();
        assert!((dist - 5.0).abs() < 1e-6);
    }
}
