//! Optical-density channel matrices produced by color deconvolution.

use crate::image::Dimensions;

/// Three non-negative optical-density matrices of identical shape:
/// hematoxylin, eosin, background. Derived from an [`crate::image::Image`];
/// lifetime is bounded by one pipeline invocation.
#[derive(Debug, Clone)]
pub struct OpticalDensityChannels {
    dimensions: Dimensions,
    hematoxylin: Vec<f32>,
    eosin: Vec<f32>,
    background: Vec<f32>,
}

impl OpticalDensityChannels {
    /// # Panics
    /// In debug builds, if any channel's length does not match
    /// `dimensions.pixel_count()`.
    #[must_use]
    pub fn new(
        dimensions: Dimensions,
        hematoxylin: Vec<f32>,
        eosin: Vec<f32>,
        background: Vec<f32>,
    ) -> Self {
        let expected = dimensions.pixel_count() as usize;
        debug_assert_eq!(hematoxylin.len(), expected);
        debug_assert_eq!(eosin.len(), expected);
        debug_assert_eq!(background.len(), expected);
        Self {
            dimensions,
            hematoxylin,
            eosin,
            background,
        }
    }

    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    #[must_use]
    pub fn hematoxylin(&self) -> &[f32] {
        &self.hematoxylin
    }

    #[must_use]
    pub fn eosin(&self) -> &[f32] {
        &self.eosin
    }

    #[must_use]
    pub fn background(&self) -> &[f32] {
        &self.background
    }

    /// Selects a named channel by [`Channel`] for downstream stages that
    /// operate on "the configured channel" generically.
    #[must_use]
    pub fn channel(&self, which: Channel) -> &[f32] {
        match which {
            Channel::Hematoxylin => self.hematoxylin(),
            Channel::Eosin => self.eosin(),
            Channel::Background => self.background(),
        }
    }

    #[must_use]
    pub fn value_at(&self, channel: Channel, x: u32, y: u32) -> f32 {
        let idx = (y as usize) * (self.dimensions.width as usize) + (x as usize);
        self.channel(channel)[idx]
    }
}

/// Which of the three deconvolved channels a stage operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Channel {
    Hematoxylin,
    Eosin,
    Background,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn channel_selection() {
        let dims = Dimensions::new(1, 1);
        let od = OpticalDensityChannels::new(dims, vec![1.0], vec![2.0], vec![3.0]);
        assert_eq!(od.channel(Channel::Hematoxylin), &[1.0]);
        assert_eq!(od.channel(Channel::Eosin), &[2.0]);
        assert_eq!(od.channel(Channel::Background), &[3.0]);
    }

    #[test]
    fn value_at_indexes_row_major() {
        let dims = Dimensions::new(2, 2);
        let od = OpticalDensityChannels::new(
            dims,
            vec![0.0, 1.0, 2.0, 3.0],
            vec![0.0; 4],
            vec![0.0; 4],
        );
        assert_eq!(od.value_at(Channel::Hematoxylin, 1, 1), 3.0);
        assert_eq!(od.value_at(Channel::Hematoxylin, 0, 1), 2.0);
    }
}
