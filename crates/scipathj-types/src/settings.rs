//! Immutable, per-run settings records and the hierarchical configuration
//! that assembles them.
//!
//! Settings are constructed once per pipeline run, validated eagerly, then
//! shared by immutable reference (an `Arc<Config>`, built by the
//! orchestrator) to every component — never mutated after validation.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::od::Channel;

/// 3x3 stain response matrix; row *i* is the unit-normalized RGB response
/// of stain *i* (hematoxylin, eosin, background).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorDeconvolutionSettings {
    pub stain_matrix: [[f64; 3]; 3],
}

impl Default for ColorDeconvolutionSettings {
    /// Ruifrok & Johnston's standard H&E stain vectors; the background
    /// row is all zero and is derived at deconvolution time as the
    /// normalized cross product of the hematoxylin and eosin rows.
    fn default() -> Self {
        Self {
            stain_matrix: [
                [0.650, 0.704, 0.286],
                [0.072, 0.990, 0.105],
                [0.0, 0.0, 0.0],
            ],
        }
    }
}

impl ColorDeconvolutionSettings {
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if any matrix row is the zero
    /// vector other than the background row, which may be all-zero to
    /// request automatic derivation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, row) in self.stain_matrix.iter().enumerate().take(2) {
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm < f64::EPSILON {
                return Err(ConfigError::InvalidValue {
                    field: "color_deconvolution.stain_matrix",
                    reason: format!("row {i} must not be the zero vector"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VesselSegmentationSettings {
    pub channel: Channel,
    pub threshold: f64,
    pub min_area: f64,
    pub max_area: f64,
    pub closing_radius: f64,
}

impl Default for VesselSegmentationSettings {
    fn default() -> Self {
        Self {
            channel: Channel::Background,
            threshold: 0.15,
            min_area: 50.0,
            max_area: 1_000_000.0,
            closing_radius: 2.0,
        }
    }
}

impl VesselSegmentationSettings {
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if `min_area > max_area`, or
    /// if `closing_radius` is negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_area > self.max_area {
            return Err(ConfigError::InvalidValue {
                field: "vessel_segmentation.min_area",
                reason: "min_area must be <= max_area".to_string(),
            });
        }
        if self.closing_radius < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "vessel_segmentation.closing_radius",
                reason: "must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NuclearSegmentationSettings {
    pub prob_threshold: f64,
    pub nms_threshold: f64,
    pub normalize_bottom_percentile: f64,
    pub normalize_top_percentile: f64,
    pub tile_size: u32,
}

impl Default for NuclearSegmentationSettings {
    fn default() -> Self {
        Self {
            prob_threshold: 0.5,
            nms_threshold: 0.3,
            normalize_bottom_percentile: 1.0,
            normalize_top_percentile: 99.0,
            tile_size: 1024,
        }
    }
}

impl NuclearSegmentationSettings {
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if any threshold is outside
    /// `[0, 1]`, if percentiles are out of `[0, 100]` or inverted, or if
    /// `tile_size` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.prob_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "nuclear_segmentation.prob_threshold",
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "nuclear_segmentation.nms_threshold",
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if self.normalize_bottom_percentile >= self.normalize_top_percentile
            || self.normalize_bottom_percentile < 0.0
            || self.normalize_top_percentile > 100.0
        {
            return Err(ConfigError::InvalidValue {
                field: "nuclear_segmentation.normalize_bottom_percentile",
                reason: "must satisfy 0 <= bottom < top <= 100".to_string(),
            });
        }
        if self.tile_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "nuclear_segmentation.tile_size",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CytoplasmSegmentationSettings {
    #[serde(alias = "useVesselExclusion")]
    pub exclude_vessels: bool,
    pub max_cytoplasm_radius: f64,
    pub boundary_smoothing_factor: f64,
    pub vessel_safety_margin: f64,
}

impl Default for CytoplasmSegmentationSettings {
    fn default() -> Self {
        Self {
            exclude_vessels: true,
            max_cytoplasm_radius: 40.0,
            boundary_smoothing_factor: 0.0,
            vessel_safety_margin: 0.0,
        }
    }
}

impl CytoplasmSegmentationSettings {
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if `max_cytoplasm_radius` is
    /// not positive, or if `boundary_smoothing_factor` /
    /// `vessel_safety_margin` are negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cytoplasm_radius <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "cytoplasm_segmentation.max_cytoplasm_radius",
                reason: "must be positive".to_string(),
            });
        }
        if self.boundary_smoothing_factor < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "cytoplasm_segmentation.boundary_smoothing_factor",
                reason: "must be non-negative".to_string(),
            });
        }
        if self.vessel_safety_margin < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "cytoplasm_segmentation.vessel_safety_margin",
                reason: "must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureGroups {
    pub morphology: bool,
    pub intensity: bool,
    pub spatial: bool,
}

impl Default for FeatureGroups {
    fn default() -> Self {
        Self {
            morphology: true,
            intensity: true,
            spatial: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEnable {
    pub hematoxylin: bool,
    pub eosin: bool,
    pub background: bool,
    pub grayscale: bool,
}

impl Default for ChannelEnable {
    fn default() -> Self {
        Self {
            hematoxylin: true,
            eosin: true,
            background: true,
            grayscale: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureExtractionSettings {
    pub groups: FeatureGroups,
    pub channels: ChannelEnable,
    pub neighbor_radius: u32,
    pub export_precision: u8,
}

impl Default for FeatureExtractionSettings {
    fn default() -> Self {
        Self {
            groups: FeatureGroups::default(),
            channels: ChannelEnable::default(),
            neighbor_radius: 100,
            export_precision: 6,
        }
    }
}

impl FeatureExtractionSettings {
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if `export_precision` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export_precision == 0 {
            return Err(ConfigError::InvalidValue {
                field: "feature_extraction.export_precision",
                reason: "must be at least 1 significant digit".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSettings {
    pub model_path: String,
    pub confidence_threshold: f64,
    pub feature_selection: Vec<String>,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            confidence_threshold: 0.5,
            feature_selection: Vec::new(),
        }
    }
}

impl ClassificationSettings {
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if `confidence_threshold` is
    /// outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "classification.confidence_threshold",
                reason: "must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    pub parallelism: u32,
    pub continue_on_error: bool,
    pub progress_cadence_ms: u32,
    pub retry_count: u32,
    /// Per-image wall-clock timeout in milliseconds; `None` disables it.
    pub image_timeout_ms: Option<u32>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            parallelism: 4,
            continue_on_error: true,
            progress_cadence_ms: 250,
            retry_count: 1,
            image_timeout_ms: None,
        }
    }
}

impl BatchSettings {
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if `parallelism` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch.parallelism",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Aggregates every per-category settings record for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub color_deconvolution: ColorDeconvolutionSettings,
    pub vessel_segmentation: VesselSegmentationSettings,
    pub nuclear_segmentation: NuclearSegmentationSettings,
    pub cytoplasm_segmentation: CytoplasmSegmentationSettings,
    pub feature_extraction: FeatureExtractionSettings,
    pub classification: ClassificationSettings,
    pub batch: BatchSettings,
}

impl Config {
    /// Loads and parses a TOML config file. Does not validate; call
    /// [`Config::validate`] before use.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is not valid TOML matching this shape.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        Ok(config)
    }

    /// Eager, whole-config validation: every section is checked and the
    /// first failure rejects the entire config, as no worker should start
    /// against a partially-valid configuration.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] encountered across all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.color_deconvolution.validate()?;
        self.vessel_segmentation.validate()?;
        self.nuclear_segmentation.validate()?;
        self.cytoplasm_segmentation.validate()?;
        self.feature_extraction.validate()?;
        self.classification.validate()?;
        self.batch.validate()?;
        Ok(())
    }
}
