//! Optional per-pixel fields.
//!
//! Every pixel node carries position and raw value. Everything else is an
//! "extra" chosen once per session: the pipeline is generic over
//! [`PixelExtras`] and [`PixelSchema`] picks the concrete type at the top,
//! so unused fields cost nothing in the arena.

use serde::{Deserialize, Serialize};

/// Everything the front-end knows about one pixel when it is captured.
///
/// Each [`PixelExtras`] implementation keeps the subset it needs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelSample {
    /// Raw (background-subtracted) value.
    pub value: f32,
    /// Filtered value used for detection.
    pub cdvalue: f32,
    /// Local noise variance.
    pub var: f32,
    /// Detection threshold in effect for this pixel.
    pub thresh: f32,
}

/// Optional fields stored next to each pixel node.
pub trait PixelExtras: Copy + Send + Sync + std::fmt::Debug + 'static {
    /// Schema tag for this record shape.
    const SCHEMA: PixelSchema;

    /// Keep the fields this record shape stores.
    fn capture(sample: &PixelSample) -> Self;

    /// Filtered value, if stored.
    fn cdvalue(&self) -> Option<f32> {
        None
    }

    /// Noise variance, if stored.
    fn variance(&self) -> Option<f32> {
        None
    }

    /// Threshold at capture time, if stored.
    fn threshold(&self) -> Option<f32> {
        None
    }
}

/// No optional fields; detection runs on the raw value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bare;

/// Filtered value only.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Filtered {
    pub cdvalue: f32,
}

/// Filtered value and noise variance.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Noisy {
    pub cdvalue: f32,
    pub var: f32,
}

/// Filtered value, noise variance and the per-pixel threshold.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Full {
    pub cdvalue: f32,
    pub var: f32,
    pub thresh: f32,
}

impl PixelExtras for Bare {
    const SCHEMA: PixelSchema = PixelSchema::Bare;

    fn capture(_sample: &PixelSample) -> Self {
        Bare
    }
}

impl PixelExtras for Filtered {
    const SCHEMA: PixelSchema = PixelSchema::Filtered;

    fn capture(sample: &PixelSample) -> Self {
        Filtered {
            cdvalue: sample.cdvalue,
        }
    }

    fn cdvalue(&self) -> Option<f32> {
        Some(self.cdvalue)
    }
}

impl PixelExtras for Noisy {
    const SCHEMA: PixelSchema = PixelSchema::Noisy;

    fn capture(sample: &PixelSample) -> Self {
        Noisy {
            cdvalue: sample.cdvalue,
            var: sample.var,
        }
    }

    fn cdvalue(&self) -> Option<f32> {
        Some(self.cdvalue)
    }

    fn variance(&self) -> Option<f32> {
        Some(self.var)
    }
}

impl PixelExtras for Full {
    const SCHEMA: PixelSchema = PixelSchema::Full;

    fn capture(sample: &PixelSample) -> Self {
        Full {
            cdvalue: sample.cdvalue,
            var: sample.var,
            thresh: sample.thresh,
        }
    }

    fn cdvalue(&self) -> Option<f32> {
        Some(self.cdvalue)
    }

    fn variance(&self) -> Option<f32> {
        Some(self.var)
    }

    fn threshold(&self) -> Option<f32> {
        Some(self.thresh)
    }
}

/// Names the record shape selected for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelSchema {
    Bare,
    Filtered,
    Noisy,
    Full,
}

impl PixelSchema {
    /// Smallest record shape that holds what the session produces.
    ///
    /// # Arguments
    /// * `filtered` - a convolution kernel is applied
    /// * `noise` - a noise map is supplied
    /// * `per_pixel_threshold` - thresholds vary from pixel to pixel
    pub fn select(filtered: bool, noise: bool, per_pixel_threshold: bool) -> Self {
        match (noise, per_pixel_threshold, filtered) {
            (_, true, _) => PixelSchema::Full,
            (true, false, _) => PixelSchema::Noisy,
            (false, false, true) => PixelSchema::Filtered,
            (false, false, false) => PixelSchema::Bare,
        }
    }

    pub fn has_threshold(&self) -> bool {
        matches!(self, PixelSchema::Full)
    }
}
