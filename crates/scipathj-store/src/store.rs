//! `RoiStore`: thread-safe `image_key -> Vec<Roi>` index.
//!
//! A `RwLock<HashMap<..>>` gives per-image locking under one shared
//! global read guard: `add`/`remove`/`clear` for one image acquire only
//! that image's `Mutex`, while enumerating all images (`export_archive`,
//! batch reports) takes the outer `RwLock` for reading and iterates
//! without blocking concurrent per-image writers of *other* images.
//! Matches the concurrency model: multiple orchestrator workers call
//! `add` concurrently for different image keys.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use scipathj_types::{Category, Roi};

struct ImageEntry {
    rois: Vec<Roi>,
    next_id: u64,
}

impl ImageEntry {
    const fn new() -> Self {
        Self {
            rois: Vec::new(),
            next_id: 0,
        }
    }
}

/// Thread-safe multi-image ROI index. Owns every ROI inserted into it;
/// ROIs are moved in on [`RoiStore::add`].
#[derive(Default)]
pub struct RoiStore {
    images: RwLock<HashMap<String, Mutex<ImageEntry>>>,
}

impl RoiStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            images: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts `roi` under `image_key`, assigning the next monotonic id
    /// for that image (ids are never reused, even after `remove`).
    /// `roi`'s own id is discarded; the caller should construct it with
    /// a placeholder.
    ///
    /// # Panics
    /// If an internal lock is poisoned by a prior panic in another
    /// thread while holding it — this is a programmer-error invariant
    /// violation, not an expected runtime condition.
    pub fn add(&self, image_key: &str, roi: Roi) -> u64 {
        let images = self.images.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = images.get(image_key) {
            let mut entry = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let id = entry.next_id;
            entry.next_id += 1;
            entry.rois.push(roi.with_id(id));
            return id;
        }
        drop(images);

        let mut images = self.images.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = images.entry(image_key.to_string()).or_insert_with(|| Mutex::new(ImageEntry::new()));
        let mut entry = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = entry.next_id;
        entry.next_id += 1;
        entry.rois.push(roi.with_id(id));
        id
    }

    /// All ROIs for `image_key`, in insertion order. Empty if the image
    /// has never had an ROI added.
    #[must_use]
    pub fn get_all(&self, image_key: &str) -> Vec<Roi> {
        let images = self.images.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        images.get(image_key).map_or_else(Vec::new, |entry| {
            entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner).rois.clone()
        })
    }

    #[must_use]
    pub fn by_category(&self, image_key: &str, category: Category) -> Vec<Roi> {
        self.get_all(image_key).into_iter().filter(|roi| roi.category() == category).collect()
    }

    /// Replaces the ROI with `roi_id` in place, keeping its id and
    /// position, by applying `f` to a clone of its current value. No-op
    /// if `image_key`/`roi_id` is not present. Used by the pipeline to
    /// attach features and classification after a ROI's geometry has
    /// already been inserted (and possibly referenced by a `CellLinks`),
    /// without reassigning a new id the way `remove` + `add` would.
    pub fn update<F>(&self, image_key: &str, roi_id: u64, f: F)
    where
        F: FnOnce(Roi) -> Roi,
    {
        let images = self.images.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(entry) = images.get(image_key) else {
            return;
        };
        let mut entry = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(slot) = entry.rois.iter_mut().find(|roi| roi.id() == roi_id) {
            *slot = f(slot.clone()).with_id(roi_id);
        }
    }

    /// Removes one ROI by id. Returns `true` if it was present.
    pub fn remove(&self, image_key: &str, roi_id: u64) -> bool {
        let images = self.images.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(entry) = images.get(image_key) else {
            return false;
        };
        let mut entry = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = entry.rois.len();
        entry.rois.retain(|roi| roi.id() != roi_id);
        entry.rois.len() != before
    }

    /// Removes every ROI for `image_key`, keeping the image's id counter
    /// (so subsequent inserts still never reuse an id).
    pub fn clear(&self, image_key: &str) {
        let images = self.images.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = images.get(image_key) {
            entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner).rois.clear();
        }
    }

    /// Removes every image and its ROIs.
    pub fn clear_all(&self) {
        let mut images = self.images.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        images.clear();
    }

    /// Every image key currently tracked (including ones cleared to
    /// zero ROIs but not yet dropped).
    #[must_use]
    pub fn image_keys(&self) -> Vec<String> {
        let images = self.images.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        images.keys().cloned().collect()
    }

    /// Total ROI count across every image, optionally restricted to one
    /// category.
    #[must_use]
    pub fn total_count(&self, category: Option<Category>) -> usize {
        let images = self.images.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        images
            .values()
            .map(|entry| {
                let entry = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                match category {
                    Some(c) => entry.rois.iter().filter(|roi| roi.category() == c).count(),
                    None => entry.rois.len(),
                }
            })
            .sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scipathj_types::{Geometry, Point, Polygon};

    use super::*;

    fn square_roi(id: u64, image_key: &str, name: &str, category: Category) -> Roi {
        let poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
        .unwrap();
        Roi::new(id, image_key, name, category, Geometry::Polygon(poly))
    }

    #[test]
    fn ids_are_assigned_monotonically_per_image() {
        let store = RoiStore::new();
        let a = store.add("img1", square_roi(0, "img1", "a", Category::Nucleus));
        let b = store.add("img1", square_roi(0, "img1", "b", Category::Nucleus));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn ids_are_independent_per_image() {
        let store = RoiStore::new();
        store.add("img1", square_roi(0, "img1", "a", Category::Nucleus));
        let first_of_img2 = store.add("img2", square_roi(0, "img2", "a", Category::Nucleus));
        assert_eq!(first_of_img2, 0);
    }

    #[test]
    fn removed_ids_are_never_reused() {
        let store = RoiStore::new();
        let first = store.add("img1", square_roi(0, "img1", "a", Category::Nucleus));
        store.remove("img1", first);
        let second = store.add("img1", square_roi(0, "img1", "b", Category::Nucleus));
        assert_ne!(first, second);
        assert_eq!(second, 1);
    }

    #[test]
    fn update_preserves_id_and_position() {
        let store = RoiStore::new();
        let a = store.add("img1", square_roi(0, "img1", "a", Category::Nucleus));
        let b = store.add("img1", square_roi(0, "img1", "b", Category::Nucleus));
        store.update("img1", a, |roi| roi.with_features(std::collections::HashMap::from([(
            "area".to_string(),
            scipathj_types::FeatureValue::Number(42.0),
        )])));
        let rois = store.get_all("img1");
        assert_eq!(rois[0].id(), a);
        assert_eq!(rois[1].id(), b);
        assert_eq!(
            rois[0].features().get("area").and_then(scipathj_types::FeatureValue::as_f64),
            Some(42.0)
        );
    }

    #[test]
    fn update_on_unknown_id_is_a_no_op() {
        let store = RoiStore::new();
        store.add("img1", square_roi(0, "img1", "a", Category::Nucleus));
        store.update("img1", 999, |roi| roi);
        assert_eq!(store.get_all("img1").len(), 1);
    }

    #[test]
    fn by_category_filters_correctly() {
        let store = RoiStore::new();
        store.add("img1", square_roi(0, "img1", "n", Category::Nucleus));
        store.add("img1", square_roi(0, "img1", "v", Category::Vessel));
        assert_eq!(store.by_category("img1", Category::Nucleus).len(), 1);
        assert_eq!(store.by_category("img1", Category::Vessel).len(), 1);
    }

    #[test]
    fn clear_empties_one_image_without_affecting_others() {
        let store = RoiStore::new();
        store.add("img1", square_roi(0, "img1", "a", Category::Nucleus));
        store.add("img2", square_roi(0, "img2", "a", Category::Nucleus));
        store.clear("img1");
        assert!(store.get_all("img1").is_empty());
        assert_eq!(store.get_all("img2").len(), 1);
    }

    #[test]
    fn clear_all_empties_every_image() {
        let store = RoiStore::new();
        store.add("img1", square_roi(0, "img1", "a", Category::Nucleus));
        store.add("img2", square_roi(0, "img2", "a", Category::Nucleus));
        store.clear_all();
        assert!(store.image_keys().is_empty());
    }

    #[test]
    fn unknown_image_key_yields_empty_view() {
        let store = RoiStore::new();
        assert!(store.get_all("nonexistent").is_empty());
    }

    #[test]
    fn total_count_sums_across_images_and_filters_by_category() {
        let store = RoiStore::new();
        store.add("img1", square_roi(0, "img1", "a", Category::Nucleus));
        store.add("img2", square_roi(0, "img2", "b", Category::Vessel));
        assert_eq!(store.total_count(None), 2);
        assert_eq!(store.total_count(Some(Category::Nucleus)), 1);
    }
}
