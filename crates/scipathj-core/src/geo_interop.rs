//! Conversions and boolean operations bridging [`scipathj_types::Polygon`]
//! and `geo`'s `f64` polygon type, shared by nucleus NMS and cell
//! construction.

use geo::{BooleanOps, Coord, LineString};
use scipathj_types::{GeometryError, Point, Polygon};

pub type GeoPolygon = geo::Polygon<f64>;
pub type GeoMultiPolygon = geo::MultiPolygon<f64>;

#[must_use]
pub fn to_geo(polygon: &Polygon) -> GeoPolygon {
    let coords: Vec<Coord<f64>> = polygon
        .vertices()
        .iter()
        .map(|p| Coord {
            x: f64::from(p.x),
            y: f64::from(p.y),
        })
        .collect();
    GeoPolygon::new(LineString::new(coords), vec![])
}

/// # Errors
/// Returns [`GeometryError::TooFewVertices`] if the exterior ring of
/// `geo_polygon` has fewer than 3 distinct vertices.
pub fn from_geo(geo_polygon: &GeoPolygon) -> Result<Polygon, GeometryError> {
    #[allow(clippy::cast_possible_truncation)]
    let points: Vec<Point> = geo_polygon
        .exterior()
        .coords()
        .map(|c| Point::new(c.x as f32, c.y as f32))
        .collect();
    Polygon::new(points)
}

#[must_use]
pub fn area(polygon: &GeoPolygon) -> f64 {
    use geo::Area;
    polygon.unsigned_area()
}

#[must_use]
pub fn intersection_area(a: &GeoPolygon, b: &GeoPolygon) -> f64 {
    let result: GeoMultiPolygon = a.intersection(b);
    use geo::Area;
    result.unsigned_area()
}

/// Intersection-over-union of two polygons, by area.
#[must_use]
pub fn iou(a: &GeoPolygon, b: &GeoPolygon) -> f64 {
    let inter = intersection_area(a, b);
    if inter <= 0.0 {
        return 0.0;
    }
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[must_use]
pub fn difference(a: &GeoPolygon, b: &GeoMultiPolygon) -> GeoMultiPolygon {
    a.difference(b)
}

#[must_use]
pub fn union_all(polygons: &[GeoPolygon]) -> GeoMultiPolygon {
    polygons.iter().fold(GeoMultiPolygon::new(vec![]), |acc, p| {
        acc.union(&GeoMultiPolygon::new(vec![p.clone()]))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn square(x0: f32, y0: f32, side: f32) -> Polygon {
        Polygon::new(vec![
            Point::new(x0, y0),
            Point::new(x0 + side, y0),
            Point::new(x0 + side, y0 + side),
            Point::new(x0, y0 + side),
        ])
        .unwrap()
    }

    #[test]
    fn round_trip_through_geo() {
        let poly = square(0.0, 0.0, 10.0);
        let geo_poly = to_geo(&poly);
        let back = from_geo(&geo_poly).unwrap();
        assert!((back.area() - poly.area()).abs() < 1e-6);
    }

    #[test]
    fn iou_of_identical_squares_is_one() {
        let a = to_geo(&square(0.0, 0.0, 10.0));
        let b = to_geo(&square(0.0, 0.0, 10.0));
        assert!((iou(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_squares_is_zero() {
        let a = to_geo(&square(0.0, 0.0, 10.0));
        let b = to_geo(&square(100.0, 100.0, 10.0));
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = to_geo(&square(0.0, 0.0, 10.0));
        let b = to_geo(&square(5.0, 0.0, 10.0));
        // intersection = 5x10 = 50, union = 100+100-50=150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }
}
