//! CSV export: per-ROI and per-image-summary reports, in US (`,` / `.`)
//! or EU (`;` / `,`) locale variants, UTF-8, LF line endings.
//!
//! The `csv` crate writes the field *structure*; locale only changes the
//! delimiter byte and how numbers are rendered, so both variants are
//! built by the same row-assembly code with a [`CsvFormat`]-dependent
//! number formatter rather than two separate writers.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use scipathj_types::{Category, FeatureValue, Roi};

use crate::error::StoreError;
use crate::store::RoiStore;

/// Locale variant for CSV exports. US uses a comma field separator and a
/// `.` decimal point; EU swaps both (semicolon separator, `,` decimal) to
/// stay readable in EU-locale spreadsheet software.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvFormat {
    Us,
    Eu,
}

impl CsvFormat {
    const fn delimiter(self) -> u8 {
        match self {
            Self::Us => b',',
            Self::Eu => b';',
        }
    }

    fn format_number(self, value: f64, significant_digits: u8) -> String {
        let rendered = format_significant(value, significant_digits);
        match self {
            Self::Us => rendered,
            Self::Eu => rendered.replace('.', ","),
        }
    }
}

/// Renders `value` to `significant_digits` significant figures (not
/// decimal places). Non-finite values render as `NaN`/`inf`/`-inf`,
/// matching the spec's "ratio features on degenerate ROIs yield NaN, not
/// an error" edge case.
fn format_significant(value: f64, significant_digits: u8) -> String {
    if !value.is_finite() {
        return format!("{value}");
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let digits = i32::from(significant_digits.max(1));
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (digits - 1 - magnitude).max(0);
    #[allow(clippy::cast_sign_loss)]
    format!("{value:.*}", decimals as usize)
}

fn feature_cell(value: &FeatureValue, format: CsvFormat, precision: u8) -> String {
    match value {
        FeatureValue::Number(n) => format.format_number(*n, precision),
        FeatureValue::Text(s) => s.clone(),
    }
}

fn writer_for(path: &Path, format: CsvFormat) -> Result<csv::Writer<std::fs::File>, StoreError> {
    let file = std::fs::File::create(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(csv::WriterBuilder::new()
        .delimiter(format.delimiter())
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(file))
}

fn included_rois(store: &RoiStore, include_ignored: bool) -> Vec<Roi> {
    let mut keys = store.image_keys();
    keys.sort();
    keys.into_iter()
        .flat_map(|key| store.get_all(&key))
        .filter(|roi| include_ignored || !roi.ignored())
        .collect()
}

/// Writes the per-ROI report: one row per ROI, columns `image`,
/// `category`, `roi_id`, every feature name seen across the exported
/// ROIs (sorted, for a deterministic column order), `predicted_class`,
/// `confidence`.
///
/// # Errors
/// Returns [`StoreError::Io`] or [`StoreError::Csv`] on write failure.
pub fn export_per_roi(
    store: &RoiStore,
    path: &Path,
    format: CsvFormat,
    include_ignored: bool,
    precision: u8,
) -> Result<(), StoreError> {
    let rois = included_rois(store, include_ignored);

    let mut feature_names: BTreeSet<String> = BTreeSet::new();
    for roi in &rois {
        feature_names.extend(roi.features().keys().cloned());
    }
    let feature_names: Vec<String> = feature_names.into_iter().collect();

    let mut writer = writer_for(path, format)?;

    let mut header = vec!["image".to_string(), "category".to_string(), "roi_id".to_string()];
    header.extend(feature_names.iter().cloned());
    header.push("predicted_class".to_string());
    header.push("confidence".to_string());
    writer.write_record(&header)?;

    for roi in &rois {
        let mut row = vec![roi.image_key().to_string(), roi.category().to_string(), roi.id().to_string()];
        for name in &feature_names {
            let cell = roi.features().get(name).map_or_else(String::new, |v| feature_cell(v, format, precision));
            row.push(cell);
        }
        match roi.classification() {
            Some(classification) => {
                row.push(classification.predicted_class.clone());
                let confidence = classification.probabilities.values().copied().fold(f64::NEG_INFINITY, f64::max);
                row.push(format.format_number(confidence, precision));
            }
            None => {
                row.push(String::new());
                row.push(String::new());
            }
        }
        writer.write_record(&row)?;
    }

    writer.flush().map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

const SUMMARY_CATEGORIES: [Category; 5] =
    [Category::Vessel, Category::Nucleus, Category::Cytoplasm, Category::Cell, Category::Ignore];

/// Per-image, per-category mean and median of one numeric feature.
fn mean_and_median(values: &mut [f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    };
    (mean, median)
}

/// Writes the per-image summary report: one row per image, with counts
/// per category and, for the four analysis categories (VESSEL, NUCLEUS,
/// CYTOPLASM, CELL — IGNORE carries no feature aggregates), the mean and
/// median of every numeric feature seen anywhere in the export for that
/// category.
///
/// # Errors
/// Returns [`StoreError::Io`] or [`StoreError::Csv`] on write failure.
pub fn export_per_image_summary(
    store: &RoiStore,
    path: &Path,
    format: CsvFormat,
    include_ignored: bool,
    precision: u8,
) -> Result<(), StoreError> {
    let mut image_keys = store.image_keys();
    image_keys.sort();

    let rois_by_image: Vec<(String, Vec<Roi>)> = image_keys
        .iter()
        .map(|key| {
            let rois: Vec<Roi> = store.get_all(key).into_iter().filter(|roi| include_ignored || !roi.ignored()).collect();
            (key.clone(), rois)
        })
        .collect();

    // Global, deterministic feature-name union per aggregated category.
    let mut feature_names_by_category: HashMap<Category, BTreeSet<String>> = HashMap::new();
    for (_, rois) in &rois_by_image {
        for roi in rois {
            if roi.category() == Category::Ignore {
                continue;
            }
            feature_names_by_category.entry(roi.category()).or_default().extend(roi.features().keys().cloned());
        }
    }
    let aggregate_categories = [Category::Vessel, Category::Nucleus, Category::Cytoplasm, Category::Cell];
    let feature_names: HashMap<Category, Vec<String>> = aggregate_categories
        .iter()
        .map(|&c| (c, feature_names_by_category.remove(&c).unwrap_or_default().into_iter().collect::<Vec<_>>()))
        .collect();

    let mut writer = writer_for(path, format)?;

    let mut header = vec!["image".to_string()];
    for category in SUMMARY_CATEGORIES {
        header.push(format!("{}_count", category.as_str().to_lowercase()));
    }
    for category in aggregate_categories {
        for name in &feature_names[&category] {
            let prefix = category.as_str().to_lowercase();
            header.push(format!("{prefix}_{name}_mean"));
            header.push(format!("{prefix}_{name}_median"));
        }
    }
    writer.write_record(&header)?;

    for (image_key, rois) in &rois_by_image {
        let mut row = vec![image_key.clone()];
        for category in SUMMARY_CATEGORIES {
            let count = rois.iter().filter(|r| r.category() == category).count();
            row.push(count.to_string());
        }
        for category in aggregate_categories {
            let in_category: Vec<&Roi> = rois.iter().filter(|r| r.category() == category).collect();
            for name in &feature_names[&category] {
                let mut values: Vec<f64> =
                    in_category.iter().filter_map(|r| r.features().get(name)).filter_map(FeatureValue::as_f64).collect();
                if values.is_empty() {
                    row.push(String::new());
                    row.push(String::new());
                } else {
                    let (mean, median) = mean_and_median(&mut values);
                    row.push(format.format_number(mean, precision));
                    row.push(format.format_number(median, precision));
                }
            }
        }
        writer.write_record(&row)?;
    }

    writer.flush().map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scipathj_types::{Classification, Geometry, Point, Polygon};

    use super::*;

    fn square_roi(image_key: &str, name: &str, category: Category) -> Roi {
        let poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
        .unwrap();
        Roi::new(0, image_key, name, category, Geometry::Polygon(poly))
    }

    #[test]
    fn format_significant_digits() {
        assert_eq!(format_significant(1234.5678, 4), "1235");
        assert_eq!(format_significant(0.0001234, 2), "0.00012");
        assert_eq!(format_significant(0.0, 6), "0");
    }

    #[test]
    fn eu_format_swaps_decimal_and_delimiter() {
        assert_eq!(CsvFormat::Eu.delimiter(), b';');
        assert_eq!(CsvFormat::Eu.format_number(1.5, 6), "1,5");
        assert_eq!(CsvFormat::Us.format_number(1.5, 6), "1.5");
    }

    #[test]
    fn per_roi_export_writes_header_and_rows() {
        let store = RoiStore::new();
        let mut features = HashMap::new();
        features.insert("area".to_string(), FeatureValue::Number(100.0));
        let roi = square_roi("img1", "img1_nucleus_0", Category::Nucleus)
            .with_features(features)
            .with_classification(Classification {
                predicted_class: "tumor".to_string(),
                probabilities: HashMap::from([("tumor".to_string(), 0.9), ("stroma".to_string(), 0.1)]),
            });
        store.add("img1", roi);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("per_roi.csv");
        export_per_roi(&store, &path, CsvFormat::Us, true, 6).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("image,category,roi_id,area,predicted_class,confidence\n"));
        assert!(text.contains("img1,NUCLEUS,0,100.000,tumor,0.900000"));
    }

    #[test]
    fn ignored_rois_excluded_when_include_ignored_false() {
        let store = RoiStore::new();
        let mut roi = square_roi("img1", "img1_nucleus_0", Category::Nucleus);
        roi.set_ignored(true);
        store.add("img1", roi);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("per_roi.csv");
        export_per_roi(&store, &path, CsvFormat::Us, false, 6).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1, "only the header should be present");
    }

    #[test]
    fn per_image_summary_counts_and_aggregates() {
        let store = RoiStore::new();
        let mut f1 = HashMap::new();
        f1.insert("area".to_string(), FeatureValue::Number(10.0));
        let mut f2 = HashMap::new();
        f2.insert("area".to_string(), FeatureValue::Number(20.0));
        store.add("img1", square_roi("img1", "a", Category::Nucleus).with_features(f1));
        store.add("img1", square_roi("img1", "b", Category::Nucleus).with_features(f2));
        store.add("img1", square_roi("img1", "c", Category::Vessel));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        export_per_image_summary(&store, &path, CsvFormat::Us, true, 6).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("nucleus_area_mean"));
        assert!(header.contains("nucleus_area_median"));
        let row = lines.next().unwrap();
        assert!(row.contains(",15.0000,15.0000")); // mean and median of [10, 20], 6 significant digits
    }
}
