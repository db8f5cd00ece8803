//! Extraction settings.
//!
//! One [`ExtractionConfig`] is built before a run and shared read-only by
//! every worker. All settings are plain data with serde support so a run
//! can be reproduced from a saved JSON file.

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::detection::deblend::{ContrastReference, PixelAllocation};
use crate::detection::ladder::LadderSpacing;
use crate::error::{ExtractError, Result};
use crate::image_proc::{default_kernel, EdgeMode, Filter, NoiseKind};

/// Largest area a deblended child needs by default.
pub const MAX_DEBLEND_AREA: usize = 3;

/// Default cleaning profile exponent.
pub const DEFAULT_CLEAN_PARAM: f64 = 1.0;

/// How `ExtractionConfig::thresh` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThresholdMode {
    /// In image units.
    #[default]
    Absolute,
    /// In units of the local noise standard deviation.
    Relative,
}

/// Detection filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Odd-sized kernel; row index runs along y.
    pub kernel: Array2<f32>,
    /// Boundary policy for taps outside the image.
    pub edge_mode: EdgeMode,
    /// Scale the kernel to unit sum before convolving.
    pub normalize: bool,
    /// Detect on the noise-weighted significance instead of the convolved
    /// image. Needs a noise model; the threshold is then in sigma units.
    pub matched: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kernel: default_kernel(),
            edge_mode: EdgeMode::default(),
            normalize: true,
            matched: false,
        }
    }
}

impl FilterConfig {
    /// Build the filter, normalising the kernel if requested.
    pub fn build(&self) -> Result<Filter> {
        let mut kernel = self.kernel.clone();
        if self.normalize {
            let sum = kernel.sum();
            if sum != 0.0 && sum.is_finite() {
                kernel.mapv_inplace(|k| k / sum);
            }
        }
        Filter::new(kernel, self.edge_mode)
    }
}

/// Deblending settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeblendConfig {
    pub enabled: bool,
    /// Ladder subdivisions; levels `k = 1..nthresh` are scanned.
    pub nthresh: usize,
    pub spacing: LadderSpacing,
    /// Minimum fraction of the reference flux a child must carry.
    pub contrast: f32,
    pub contrast_reference: ContrastReference,
    /// Smallest child; defaults to `min(min_area, MAX_DEBLEND_AREA)`.
    pub min_child_area: Option<usize>,
    /// Cap on candidates found at one ladder level.
    pub max_candidates: usize,
    pub allocation: PixelAllocation,
    /// Pixel nodes each worker may hold while deblending one object.
    /// Defaults to `nthresh` times the detection arena capacity, since every
    /// ladder level may re-label the whole object.
    pub arena_capacity: Option<usize>,
}

impl Default for DeblendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            nthresh: 32,
            spacing: LadderSpacing::default(),
            contrast: 0.005,
            contrast_reference: ContrastReference::default(),
            min_child_area: None,
            max_candidates: 1024,
            allocation: PixelAllocation::default(),
            arena_capacity: None,
        }
    }
}

impl DeblendConfig {
    /// Scratch nodes per worker given the detection arena capacity.
    pub fn scratch_capacity(&self, detection_capacity: usize) -> usize {
        self.arena_capacity
            .unwrap_or_else(|| detection_capacity.saturating_mul(self.nthresh.max(1)))
    }

    /// Minimum child area given the detection minimum area.
    pub fn min_child_area_for(&self, min_area: usize) -> usize {
        self.min_child_area
            .unwrap_or_else(|| min_area.min(MAX_DEBLEND_AREA))
            .max(1)
    }
}

/// Everything one extraction run needs besides the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Detection threshold; see `threshold_mode`.
    pub thresh: f32,
    pub threshold_mode: ThresholdMode,
    /// Smallest detection kept, in pixels.
    pub min_area: usize,
    pub filter: Option<FilterConfig>,
    /// How a noise map is expressed.
    pub noise_kind: NoiseKind,
    pub deblend: DeblendConfig,
    /// Pixel nodes the detection pass may allocate.
    pub arena_capacity: usize,
    /// Detector gain in e-/ADU for Poisson errors; 0 disables them.
    pub gain: f32,
    /// Pixels at or above this level flag their object as saturated.
    pub saturation: Option<f32>,
    /// Keep the barycenter of split objects when re-measuring them.
    pub robust: bool,
    /// Drop faint detections explained by the wings of a brighter neighbour.
    pub clean: bool,
    /// Moffat exponent of the profile used for cleaning; larger is steeper.
    pub clean_param: f64,
    /// Process detections on the rayon pool.
    pub parallel: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            thresh: 1.5,
            threshold_mode: ThresholdMode::Relative,
            min_area: 5,
            filter: Some(FilterConfig::default()),
            noise_kind: NoiseKind::StdDev,
            deblend: DeblendConfig::default(),
            arena_capacity: 300_000,
            gain: 0.0,
            saturation: None,
            robust: false,
            clean: true,
            clean_param: DEFAULT_CLEAN_PARAM,
            parallel: true,
        }
    }
}

impl ExtractionConfig {
    /// Config with an absolute threshold and defaults elsewhere.
    pub fn absolute(thresh: f32) -> Self {
        Self {
            thresh,
            threshold_mode: ThresholdMode::Absolute,
            ..Self::default()
        }
    }

    /// Check values that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if !self.thresh.is_finite() {
            return Err(ExtractError::InvalidConfig(format!(
                "threshold must be finite, got {}",
                self.thresh
            )));
        }
        if self.min_area == 0 {
            return Err(ExtractError::InvalidConfig(
                "min_area must be at least 1".to_string(),
            ));
        }
        if self.arena_capacity == 0 {
            return Err(ExtractError::InvalidConfig(
                "arena_capacity must be positive".to_string(),
            ));
        }
        if self.gain < 0.0 || !self.gain.is_finite() {
            return Err(ExtractError::InvalidConfig(format!(
                "gain must be finite and non-negative, got {}",
                self.gain
            )));
        }
        if self.clean && !(self.clean_param > 0.0 && self.clean_param.is_finite()) {
            return Err(ExtractError::InvalidConfig(format!(
                "clean_param must be finite and positive, got {}",
                self.clean_param
            )));
        }
        if let Some(filter) = &self.filter {
            filter.build()?;
        }

        let deblend = &self.deblend;
        if deblend.enabled {
            if !(deblend.contrast >= 0.0) {
                return Err(ExtractError::InvalidConfig(format!(
                    "deblend contrast must be non-negative, got {}",
                    deblend.contrast
                )));
            }
            if deblend.max_candidates == 0 || deblend.arena_capacity == Some(0) {
                return Err(ExtractError::InvalidConfig(
                    "deblend bounds must be positive".to_string(),
                ));
            }
            if let LadderSpacing::Explicit(levels) = &deblend.spacing {
                if levels.iter().any(|t| !t.is_finite()) {
                    return Err(ExtractError::InvalidConfig(
                        "explicit ladder levels must be finite".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// True when detection runs on the matched-filter significance.
    pub fn matched_filter(&self) -> bool {
        self.filter.as_ref().map_or(false, |f| f.matched)
    }

    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_validate() {
        let config = ExtractionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.deblend.nthresh, 32);
        assert_eq!(config.deblend.spacing, LadderSpacing::Logarithmic);
        assert_eq!(config.filter.as_ref().unwrap().edge_mode, EdgeMode::Constant(0.0));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ExtractionConfig::absolute(f32::NAN);
        assert!(matches!(config.validate(), Err(ExtractError::InvalidConfig(_))));

        config = ExtractionConfig::absolute(1.0);
        config.min_area = 0;
        assert!(config.validate().is_err());

        config = ExtractionConfig::absolute(1.0);
        config.filter = Some(FilterConfig {
            kernel: Array2::ones((2, 2)),
            ..FilterConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ExtractError::InvalidKernel { rows: 2, cols: 2 })
        ));

        config = ExtractionConfig::absolute(1.0);
        config.deblend.spacing = LadderSpacing::Explicit(vec![1.0, f32::INFINITY]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_child_area() {
        let deblend = DeblendConfig::default();
        assert_eq!(deblend.min_child_area_for(5), 3);
        assert_eq!(deblend.min_child_area_for(2), 2);
        let explicit = DeblendConfig {
            min_child_area: Some(8),
            ..DeblendConfig::default()
        };
        assert_eq!(explicit.min_child_area_for(5), 8);
    }

    #[test]
    fn test_scratch_capacity_scales_with_ladder() {
        let deblend = DeblendConfig::default();
        assert_eq!(deblend.scratch_capacity(300_000), 9_600_000);
        let fixed = DeblendConfig {
            arena_capacity: Some(1_000),
            ..DeblendConfig::default()
        };
        assert_eq!(fixed.scratch_capacity(300_000), 1_000);
        assert_eq!(DeblendConfig::default().scratch_capacity(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_clean_param_checked() {
        let mut config = ExtractionConfig::absolute(1.0);
        config.clean_param = 0.0;
        assert!(matches!(config.validate(), Err(ExtractError::InvalidConfig(_))));
        config.clean = false;
        config.validate().unwrap();

        config = ExtractionConfig::absolute(1.0);
        config.deblend.arena_capacity = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_normalised() {
        let filter = FilterConfig::default().build().unwrap();
        assert_relative_eq!(filter.kernel().sum(), 1.0, epsilon = 1e-6);
        let raw = FilterConfig {
            normalize: false,
            ..FilterConfig::default()
        }
        .build()
        .unwrap();
        assert_relative_eq!(raw.kernel().sum(), 16.0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("extract.json");
        let mut config = ExtractionConfig::absolute(3.0);
        config.deblend.spacing = LadderSpacing::Explicit(vec![4.0, 8.0]);
        config.deblend.allocation = PixelAllocation::Sampled { seed: 11 };
        config.saturation = Some(60_000.0);
        config.save_to_file(&path).unwrap();

        let loaded = ExtractionConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_garbage_is_invalid_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ExtractionConfig::load_from_file(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
