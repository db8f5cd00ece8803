//! Threshold ladders for deblending.
//!
//! A ladder is the increasing sequence of thresholds strictly between an
//! object's detection threshold and its filtered peak at which the object's
//! own pixels are re-labeled.

use serde::{Deserialize, Serialize};

/// How ladder levels are spaced between threshold and peak.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum LadderSpacing {
    /// `t_k = thresh · (peak/thresh)^(k/n)`; equal steps in magnitude.
    #[default]
    Logarithmic,
    /// `t_k = thresh + (peak − thresh) · k/n`
    Linear,
    /// Caller-supplied absolute levels. Levels outside `(thresh, peak)` are
    /// dropped.
    Explicit(Vec<f32>),
}

impl LadderSpacing {
    /// Levels for an object extracted at `thresh` whose filtered peak is
    /// `peak`, using `nthresh` subdivisions (levels `k = 1..nthresh`).
    ///
    /// Returns an empty ladder when `peak <= thresh` or `nthresh < 2`.
    pub fn levels(&self, nthresh: usize, thresh: f32, peak: f32) -> Vec<f32> {
        if !(peak > thresh) || !thresh.is_finite() || !peak.is_finite() {
            return Vec::new();
        }

        let mut levels = match self {
            LadderSpacing::Logarithmic if thresh > 0.0 => {
                let ratio = peak as f64 / thresh as f64;
                (1..nthresh)
                    .map(|k| (thresh as f64 * ratio.powf(k as f64 / nthresh as f64)) as f32)
                    .collect()
            }
            LadderSpacing::Logarithmic | LadderSpacing::Linear => {
                if matches!(self, LadderSpacing::Logarithmic) {
                    log::debug!(
                        "logarithmic ladder needs a positive threshold (got {thresh}), using linear spacing"
                    );
                }
                let range = peak as f64 - thresh as f64;
                (1..nthresh)
                    .map(|k| (thresh as f64 + range * k as f64 / nthresh as f64) as f32)
                    .collect()
            }
            LadderSpacing::Explicit(levels) => levels.clone(),
        };

        levels.retain(|&t| t > thresh && t < peak);
        levels.sort_by(|a, b| a.total_cmp(b));
        levels.dedup();
        levels
    }
}
