//! Shared data model for the SciPathJ analysis pipeline: image buffers,
//! optical-density channels, geometry, the ROI entity, and the immutable
//! settings records every component is configured from.

pub mod error;
pub mod geom;
pub mod image;
pub mod od;
pub mod roi;
pub mod settings;

pub use error::{ConfigError, GeometryError};
pub use geom::{Geometry, Point, Polygon, Rectangle};
pub use image::{BitDepth, Dimensions, Image};
pub use od::{Channel, OpticalDensityChannels};
pub use roi::{CellLinks, Category, Classification, DisplayColor, FeatureValue, Roi};
pub use settings::{
    BatchSettings, ChannelEnable, ClassificationSettings, ColorDeconvolutionSettings, Config,
    CytoplasmSegmentationSettings, FeatureExtractionSettings, FeatureGroups,
    NuclearSegmentationSettings, VesselSegmentationSettings,
};
