//! Core 2-D geometry shared by every pipeline stage.
//!
//! Polygons are stored in pixel coordinates at subpixel (32-bit float)
//! precision, matching the export precision of the ROI archive format.
//! Heavier geometric algorithms (Voronoi, polygon boolean ops) run in
//! 64-bit float space in `scipathj-core` and convert back to `Polygon` at
//! the boundary.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// A single 2-D point in pixel coordinates, subpixel precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

/// An axis-aligned bounding region, pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rectangle {
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    #[must_use]
    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    #[must_use]
    pub fn contains_rect(&self, other: &Self) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }
}

/// An ordered, implicitly-closed sequence of vertices in pixel space.
///
/// Invariants enforced at construction: at least 3 vertices, no
/// consecutive duplicate vertices, and a consistent winding order
/// (counter-clockwise, matching `geo`'s exterior-ring convention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    /// Builds a polygon, normalizing winding order to counter-clockwise.
    ///
    /// # Errors
    /// Returns [`GeometryError::TooFewVertices`] if fewer than 3 distinct
    /// vertices remain after removing consecutive duplicates.
    pub fn new(vertices: Vec<Point>) -> Result<Self, GeometryError> {
        let mut deduped: Vec<Point> = Vec::with_capacity(vertices.len());
        for v in vertices {
            if deduped.last().is_none_or(|last: &Point| *last != v) {
                deduped.push(v);
            }
        }
        if deduped.len() > 1 && deduped.first() == deduped.last() {
            deduped.pop();
        }
        if deduped.len() < 3 {
            return Err(GeometryError::TooFewVertices {
                found: deduped.len(),
            });
        }

        let mut polygon = Self { vertices: deduped };
        if polygon.signed_area() < 0.0 {
            polygon.vertices.reverse();
        }
        Ok(polygon)
    }

    #[must_use]
    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    #[must_use]
    pub fn into_vertices(self) -> Vec<Point> {
        self.vertices
    }

    /// Signed area via the shoelace formula; positive for counter-clockwise
    /// winding.
    #[must_use]
    pub fn signed_area(&self) -> f64 {
        let n = self.vertices.len();
        let mut sum = 0.0_f64;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            sum += f64::from(a.x) * f64::from(b.y) - f64::from(b.x) * f64::from(a.y);
        }
        sum / 2.0
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    #[must_use]
    pub fn perimeter(&self) -> f64 {
        let n = self.vertices.len();
        (0..n)
            .map(|i| {
                let a = self.vertices[i];
                let b = self.vertices[(i + 1) % n];
                f64::from(a.distance(&b))
            })
            .sum()
    }

    #[must_use]
    pub fn centroid(&self) -> Point {
        let n = self.vertices.len();
        let area = self.signed_area();
        if area.abs() < f64::EPSILON {
            // Degenerate (collinear) polygon: fall back to vertex average.
            let (sx, sy) = self
                .vertices
                .iter()
                .fold((0.0_f32, 0.0_f32), |(sx, sy), p| (sx + p.x, sy + p.y));
            #[allow(clippy::cast_precision_loss)]
            let count = n as f32;
            return Point::new(sx / count, sy / count);
        }
        let mut cx = 0.0_f64;
        let mut cy = 0.0_f64;
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            let cross = f64::from(a.x) * f64::from(b.y) - f64::from(b.x) * f64::from(a.y);
            cx += (f64::from(a.x) + f64::from(b.x)) * cross;
            cy += (f64::from(a.y) + f64::from(b.y)) * cross;
        }
        let factor = 1.0 / (6.0 * area);
        #[allow(clippy::cast_possible_truncation)]
        Point::new((cx * factor) as f32, (cy * factor) as f32)
    }

    /// Axis-aligned bounding rectangle of the vertex set.
    #[must_use]
    pub fn bounds(&self) -> Rectangle {
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for p in &self.vertices {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Rectangle::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Even-odd point-in-polygon test (ray casting).
    #[must_use]
    pub fn contains_point(&self, p: Point) -> bool {
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let vi = self.vertices[i];
            let vj = self.vertices[j];
            let intersects = (vi.y > p.y) != (vj.y > p.y)
                && p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x;
            if intersects {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    #[must_use]
    pub fn is_fully_within(&self, bounds: Rectangle) -> bool {
        self.vertices().iter().all(|p| bounds.contains_point(*p))
    }
}

/// An ROI's shape: either an arbitrary polygon or an axis-aligned rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Polygon(Polygon),
    Rectangle(Rectangle),
}

impl Geometry {
    #[must_use]
    pub fn bounds(&self) -> Rectangle {
        match self {
            Self::Polygon(p) => p.bounds(),
            Self::Rectangle(r) => *r,
        }
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        match self {
            Self::Polygon(p) => p.area(),
            Self::Rectangle(r) => f64::from(r.area()),
        }
    }

    #[must_use]
    pub fn centroid(&self) -> Point {
        match self {
            Self::Polygon(p) => p.centroid(),
            Self::Rectangle(r) => Point::new(r.x + r.width / 2.0, r.y + r.height / 2.0),
        }
    }

    #[must_use]
    pub fn is_fully_within(&self, bounds: Rectangle) -> bool {
        match self {
            Self::Polygon(p) => p.is_fully_within(bounds),
            Self::Rectangle(r) => bounds.contains_rect(r),
        }
    }
}
