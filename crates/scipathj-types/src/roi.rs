//! The central ROI (Region Of Interest) entity and its category tag.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geom::{Geometry, Point, Rectangle};

/// The fixed category an ROI is created with. Fixed for the ROI's
/// lifetime; polymorphism across categories is a match on this tag
/// rather than a subclass hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Vessel,
    Nucleus,
    Cytoplasm,
    Cell,
    Ignore,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vessel => "VESSEL",
            Self::Nucleus => "NUCLEUS",
            Self::Cytoplasm => "CYTOPLASM",
            Self::Cell => "CELL",
            Self::Ignore => "IGNORE",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// For a CELL ROI: the nucleus and cytoplasm ROI ids it was constructed
/// from, both within the same image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellLinks {
    pub nucleus_id: u64,
    pub cytoplasm_id: u64,
}

/// A single feature value: either numeric or, rarely, a categorical
/// string (e.g. a qualitative flag a future feature group might emit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
}

impl FeatureValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The classifier's verdict for one ROI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub predicted_class: String,
    pub probabilities: HashMap<String, f64>,
}

/// An optional display override; categories carry a default otherwise.
pub type DisplayColor = [u8; 4];

/// The central entity: a named, categorized region with optional
/// features and classification.
///
/// Immutable except for `ignored`, and `features`/`classification` which
/// are set exactly once after construction, through
/// [`crate::roi::Roi::with_features`] /
/// [`crate::roi::Roi::with_classification`] — never through ad hoc
/// setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roi {
    id: u64,
    image_key: String,
    name: String,
    category: Category,
    geometry: Geometry,
    ignored: bool,
    display_color: Option<DisplayColor>,
    links: Option<CellLinks>,
    features: HashMap<String, FeatureValue>,
    classification: Option<Classification>,
}

impl Roi {
    #[must_use]
    pub fn new(
        id: u64,
        image_key: impl Into<String>,
        name: impl Into<String>,
        category: Category,
        geometry: Geometry,
    ) -> Self {
        Self {
            id,
            image_key: image_key.into(),
            name: name.into(),
            category,
            geometry,
            ignored: false,
            display_color: None,
            links: None,
            features: HashMap::new(),
            classification: None,
        }
    }

    /// Replaces the id. The only seam through which `ROIStore` assigns
    /// its own monotonic, per-image ids at insertion time; callers
    /// constructing a ROI ahead of insertion pass a placeholder id to
    /// [`Self::new`].
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_links(mut self, links: CellLinks) -> Self {
        self.links = Some(links);
        self
    }

    #[must_use]
    pub fn with_display_color(mut self, color: DisplayColor) -> Self {
        self.display_color = Some(color);
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: HashMap<String, FeatureValue>) -> Self {
        self.features = features;
        self
    }

    #[must_use]
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn image_key(&self) -> &str {
        &self.image_key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    pub const fn ignored(&self) -> bool {
        self.ignored
    }

    /// Only entry point that mutates an existing ROI: store-level ignore
    /// toggling. Not exposed as a public setter on arbitrary fields.
    pub fn set_ignored(&mut self, ignored: bool) {
        self.ignored = ignored;
    }

    #[must_use]
    pub const fn links(&self) -> Option<CellLinks> {
        self.links
    }

    #[must_use]
    pub fn features(&self) -> &HashMap<String, FeatureValue> {
        &self.features
    }

    #[must_use]
    pub const fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    #[must_use]
    pub fn centroid(&self) -> Point {
        self.geometry.centroid()
    }

    #[must_use]
    pub fn bounds(&self) -> Rectangle {
        self.geometry.bounds()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::geom::Polygon;

    fn square_roi(id: u64, category: Category) -> Roi {
        let poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
        .unwrap();
        Roi::new(id, "img1", "img1_vessel_0", category, Geometry::Polygon(poly))
    }

    #[test]
    fn category_display() {
        assert_eq!(Category::Vessel.to_string(), "VESSEL");
        assert_eq!(Category::Cell.to_string(), "CELL");
    }

    #[test]
    fn roi_defaults_to_not_ignored_and_no_features() {
        let roi = square_roi(1, Category::Vessel);
        assert!(!roi.ignored());
        assert!(roi.features().is_empty());
        assert!(roi.classification().is_none());
    }

    #[test]
    fn set_ignored_is_the_only_mutation_path() {
        let mut roi = square_roi(1, Category::Vessel);
        roi.set_ignored(true);
        assert!(roi.ignored());
    }

    #[test]
    fn features_are_attached_via_builder() {
        let mut features = HashMap::new();
        features.insert("area".to_string(), FeatureValue::Number(100.0));
        let roi = square_roi(1, Category::Nucleus).with_features(features);
        assert_eq!(
            roi.features().get("area").and_then(FeatureValue::as_f64),
            Some(100.0),
        );
    }

    #[test]
    fn feature_value_display() {
        assert_eq!(FeatureValue::Number(1.5).to_string(), "1.5");
        assert_eq!(FeatureValue::Text("unknown".into()).to_string(), "unknown");
    }

    #[test]
    fn cell_links_round_trip() {
        let links = CellLinks {
            nucleus_id: 3,
            cytoplasm_id: 7,
        };
        let roi = square_roi(1, Category::Cell).with_links(links);
        assert_eq!(roi.links(), Some(links));
    }
}
