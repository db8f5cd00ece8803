//! Object statistics.
//!
//! [`preanalyse`] is the cheap pass run on every deblending candidate,
//! [`analyse`] the full pass run on objects that reach the output, and
//! [`analyse_mthresh`] decides how much of the deblending ladder is worth
//! scanning for one object.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::f64::consts::PI;

use super::object::{Object, ObjectFlags};
use crate::image_proc::BoundingBox;
use crate::pixel_list::{PixelArena, PixelExtras, PixelSpan};

/// Below this determinant the second moments are treated as singular.
const SINGULAR_DET: f64 = 0.00694;

/// Variance of a uniform distribution over one pixel.
const PIXEL_VARIANCE: f64 = 1.0 / 12.0;

/// Bounding box, filtered flux and both peaks.
pub fn preanalyse<E: PixelExtras>(object: &mut Object, arena: &PixelArena<E>) {
    let mut bbox = BoundingBox::new();
    let mut fdnpix = 0usize;
    let mut fdflux = 0.0f64;
    let mut fdpeak = f32::NEG_INFINITY;
    let mut dpeak = f32::NEG_INFINITY;

    for pixel in arena.iter(object.span) {
        let cval = pixel.cdvalue();
        if cval > fdpeak {
            fdpeak = cval;
            object.xcpeak = pixel.x;
            object.ycpeak = pixel.y;
        }
        if pixel.value > dpeak {
            dpeak = pixel.value;
            object.xpeak = pixel.x;
            object.ypeak = pixel.y;
        }
        bbox.expand_to_include(pixel.x, pixel.y);
        fdflux += cval as f64;
        fdnpix += 1;
    }

    object.bbox = bbox;
    object.fdnpix = fdnpix;
    object.fdflux = fdflux as f32;
    object.fdpeak = if fdnpix > 0 { fdpeak } else { 0.0 };
    object.dpeak = if fdnpix > 0 { dpeak } else { 0.0 };
}

/// Full statistics: barycenter, second moments and their errors, ellipse
/// parameters, detection and measurement fluxes.
///
/// Moments are weighted by the filtered value. With `robust` set, objects
/// produced by a split keep the barycenter they already carry instead of
/// re-deriving it from pixels that were allocated by the profile model.
/// `gain` (e-/ADU) adds a Poisson term to the errors; zero disables it.
/// Pixels at or above `saturation` set [`ObjectFlags::SATURATED`].
pub fn analyse<E: PixelExtras>(
    object: &mut Object,
    arena: &PixelArena<E>,
    robust: bool,
    gain: f32,
    saturation: Option<f32>,
) {
    preanalyse(object, arena);
    object.flags.remove(ObjectFlags::SINGULAR | ObjectFlags::SATURATED);
    if object.fdnpix == 0 {
        return;
    }

    let thresh = object.thresh;
    let half_thresh = (thresh + object.dpeak) / 2.0;
    let xmin = object.bbox.xmin as f64;
    let ymin = object.bbox.ymin as f64;

    // Uniform weights when the filtered flux cannot normalise.
    let uniform = !(object.fdflux > 0.0);
    let weight = |cval: f32| if uniform { 1.0 } else { cval as f64 };
    let total: f64 = if uniform {
        object.fdnpix as f64
    } else {
        object.fdflux as f64
    };

    let mut dnpix = 0usize;
    let mut area2 = 0usize;
    let mut dflux = 0.0f64;
    let mut mx = 0.0f64;
    let mut my = 0.0f64;
    let mut flux = 0.0f64;
    let mut var_sum = 0.0f64;
    let mut peak = f32::NEG_INFINITY;
    let mut saturated = false;

    for pixel in arena.iter(object.span) {
        let value = pixel.value;
        let pixel_thresh = pixel.threshold().unwrap_or(thresh);
        if value > pixel_thresh {
            dnpix += 1;
            dflux += value as f64;
        }
        if value > half_thresh {
            area2 += 1;
        }
        let w = weight(pixel.cdvalue());
        mx += w * (pixel.x as f64 - xmin);
        my += w * (pixel.y as f64 - ymin);

        flux += value as f64;
        var_sum += pixel.variance().unwrap_or(0.0) as f64;
        peak = peak.max(value);
        if saturation.map_or(false, |level| value >= level) {
            saturated = true;
        }
    }
    mx /= total;
    my /= total;

    if robust && object.is_merged() && object.mx.is_finite() && object.my.is_finite() {
        mx = object.mx - xmin;
        my = object.my - ymin;
    }

    let mut xm2 = 0.0f64;
    let mut ym2 = 0.0f64;
    let mut xym = 0.0f64;
    let mut emx2 = 0.0f64;
    let mut emy2 = 0.0f64;
    let mut emxy = 0.0f64;
    for pixel in arena.iter(object.span) {
        let cval = pixel.cdvalue();
        let w = weight(cval);
        let x = pixel.x as f64 - xmin - mx;
        let y = pixel.y as f64 - ymin - my;
        xm2 += w * x * x;
        ym2 += w * y * y;
        xym += w * x * y;

        let mut err = pixel.variance().unwrap_or(0.0) as f64;
        if gain > 0.0 && cval > 0.0 {
            err += cval as f64 / gain as f64;
        }
        emx2 += err * x * x;
        emy2 += err * y * y;
        emxy += err * x * y;
    }
    xm2 /= total;
    ym2 /= total;
    xym /= total;
    emx2 /= total * total;
    emy2 /= total * total;
    emxy /= total * total;

    let mut det = xm2 * ym2 - xym * xym;
    if det < SINGULAR_DET {
        xm2 += PIXEL_VARIANCE;
        ym2 += PIXEL_VARIANCE;
        det = xm2 * ym2 - xym * xym;
        object.flags |= ObjectFlags::SINGULAR;
    }

    let diff = xm2 - ym2;
    let theta = if diff.abs() > 0.0 {
        (2.0 * xym).atan2(diff) / 2.0
    } else {
        PI / 4.0
    };
    let root = (0.25 * diff * diff + xym * xym).sqrt();
    let pmx2 = 0.5 * (xm2 + ym2) + root;
    let pmy2 = 0.5 * (xm2 + ym2) - root;

    object.mx = mx + xmin;
    object.my = my + ymin;
    object.mx2 = xm2;
    object.my2 = ym2;
    object.mxy = xym;
    object.errx2 = emx2;
    object.erry2 = emy2;
    object.errxy = emxy;
    object.a = pmx2.max(0.0).sqrt() as f32;
    object.b = pmy2.max(0.0).sqrt() as f32;
    object.theta = theta as f32;
    object.cxx = (ym2 / det) as f32;
    object.cyy = (xm2 / det) as f32;
    object.cxy = (-2.0 * xym / det) as f32;

    object.dnpix = dnpix;
    object.dflux = dflux as f32;

    let per_pixel_thresholds = E::SCHEMA.has_threshold();
    let t1t2 = if half_thresh != 0.0 {
        (thresh / half_thresh) as f64
    } else {
        0.0
    };
    object.abcor = if t1t2 > 0.0 && !per_pixel_thresholds && object.a > 0.0 && object.b > 0.0 {
        let darea = area2 as f64 - dnpix as f64;
        let t1t2 = if t1t2 < 1.0 { t1t2 } else { 0.99 };
        let abcor = (if darea < 0.0 { darea } else { -1.0 })
            / (2.0 * PI * t1t2.ln() * object.a as f64 * object.b as f64);
        abcor.min(1.0) as f32
    } else {
        1.0
    };

    object.npix = object.fdnpix;
    object.flux = flux as f32;
    let poisson = if gain > 0.0 && flux > 0.0 {
        flux / gain as f64
    } else {
        0.0
    };
    object.fluxerr = (var_sum + poisson).sqrt() as f32;
    object.peak = peak;
    if saturated {
        object.flags |= ObjectFlags::SATURATED;
    }
}

/// Outcome of [`analyse_mthresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MthreshDecision {
    /// Scan the first `n` ladder levels.
    Levels(usize),
    /// Leave the object as it is.
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer pixels than two children of the minimum area need.
    TooSmall,
    /// The filtered peak does not rise above the threshold.
    NoDynamicRange,
    /// Even the lowest ladder level leaves fewer than the minimum area.
    NoLevelAboveMinArea,
}

/// Orders excesses by `total_cmp` so they can live in a heap.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Excess(f32);

impl Eq for Excess {}

impl PartialOrd for Excess {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Excess {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Decide how many `ladder` levels to scan for `object`.
///
/// Sets `object.mthresh` to the threshold at or above which fewer than
/// `min_area` pixels remain: `object.thresh` plus the `min_area`-th largest
/// excess of a pixel's filtered value over its threshold. Only ladder
/// levels below it can yield a child, so those are the levels returned.
/// `preanalyse` must have run.
pub fn analyse_mthresh<E: PixelExtras>(
    object: &mut Object,
    arena: &PixelArena<E>,
    min_area: usize,
    ladder: &[f32],
) -> MthreshDecision {
    let min_area = min_area.max(1);
    object.mthresh = object.thresh;

    if object.fdnpix < 2 * min_area {
        return MthreshDecision::Skip(SkipReason::TooSmall);
    }
    if !(object.fdpeak > object.thresh) {
        return MthreshDecision::Skip(SkipReason::NoDynamicRange);
    }

    // Min-heap of the `min_area` largest excesses; its root is the
    // `min_area`-th largest.
    let mut heap: BinaryHeap<Reverse<Excess>> = BinaryHeap::with_capacity(min_area + 1);
    for pixel in arena.iter(object.span) {
        let excess = pixel.cdvalue() - pixel.threshold().unwrap_or(object.thresh);
        if heap.len() < min_area {
            heap.push(Reverse(Excess(excess)));
        } else if heap.peek().map_or(false, |Reverse(low)| excess > low.0) {
            heap.pop();
            heap.push(Reverse(Excess(excess)));
        }
    }
    let Some(Reverse(Excess(excess))) = heap.peek().copied() else {
        return MthreshDecision::Skip(SkipReason::TooSmall);
    };
    object.mthresh = object.thresh + excess;

    let levels = ladder.iter().take_while(|&&t| t < object.mthresh).count();
    if levels == 0 {
        MthreshDecision::Skip(SkipReason::NoLevelAboveMinArea)
    } else {
        MthreshDecision::Levels(levels)
    }
}

/// Mean of the per-pixel thresholds captured in `span`.
///
/// `None` when the schema stores no thresholds or the span is empty.
pub fn mean_threshold<E: PixelExtras>(arena: &PixelArena<E>, span: PixelSpan) -> Option<f32> {
    if !E::SCHEMA.has_threshold() || span.is_empty() {
        return None;
    }
    let (sum, n) = arena
        .iter(span)
        .filter_map(|p| p.threshold())
        .fold((0.0f64, 0usize), |(sum, n), t| (sum + t as f64, n + 1));
    (n > 0).then(|| (sum / n as f64) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_list::{Bare, Full, Noisy, PixelNode, PixelSample};
    use approx::assert_relative_eq;

    fn build<E: PixelExtras>(pixels: &[(u32, u32, f32)], var: f32) -> (PixelArena<E>, Object) {
        let mut arena = PixelArena::with_capacity(pixels.len().max(1));
        let mut span = PixelSpan::EMPTY;
        for &(x, y, v) in pixels {
            let sample = PixelSample {
                value: v,
                cdvalue: v,
                var,
                thresh: 0.5,
            };
            arena.append(&mut span, PixelNode::capture(x, y, &sample)).unwrap();
        }
        let object = Object::new(span, 0.5, ObjectFlags::empty());
        (arena, object)
    }

    fn square(value: f32) -> Vec<(u32, u32, f32)> {
        (0..3)
            .flat_map(|y| (0..3).map(move |x| (x + 10, y + 20, value)))
            .collect()
    }

    #[test]
    fn test_preanalyse_peaks_and_bbox() {
        let pixels = vec![(4, 4, 1.0), (5, 4, 3.0), (6, 5, 2.0)];
        let (arena, mut object) = build::<Bare>(&pixels, 0.0);
        preanalyse(&mut object, &arena);
        assert_eq!(object.bbox.xmin, 4);
        assert_eq!(object.bbox.ymax, 5);
        assert_eq!(object.fdnpix, 3);
        assert_relative_eq!(object.fdflux, 6.0);
        assert_relative_eq!(object.fdpeak, 3.0);
        assert_eq!((object.xcpeak, object.ycpeak), (5, 4));
        assert_eq!((object.xpeak, object.ypeak), (5, 4));
    }

    #[test]
    fn test_uniform_square_moments() {
        let (arena, mut object) = build::<Bare>(&square(2.0), 0.0);
        analyse(&mut object, &arena, false, 0.0, None);
        assert_relative_eq!(object.mx, 11.0, epsilon = 1e-9);
        assert_relative_eq!(object.my, 21.0, epsilon = 1e-9);
        assert_relative_eq!(object.mx2, 2.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(object.my2, 2.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(object.mxy, 0.0, epsilon = 1e-9);
        assert_relative_eq!(object.theta, std::f32::consts::FRAC_PI_4);
        assert_relative_eq!(object.a, (2.0f32 / 3.0).sqrt(), epsilon = 1e-6);
        assert_relative_eq!(object.b, object.a, epsilon = 1e-6);
        assert_relative_eq!(object.cxx, 1.5, epsilon = 1e-5);
        assert_relative_eq!(object.cxy, 0.0, epsilon = 1e-6);
        assert!(!object.flags.contains(ObjectFlags::SINGULAR));
        assert_eq!(object.dnpix, 9);
        assert_relative_eq!(object.dflux, 18.0);
        assert_relative_eq!(object.flux, 18.0);
        assert_eq!(object.npix, 9);
        assert!(object.abcor <= 1.0);
    }

    #[test]
    fn test_abcor_with_peak_below_threshold() {
        // thresh / half_thresh exceeds one; the ratio is capped at 0.99.
        let (arena, mut object) = build::<Bare>(&square(0.4), 0.0);
        analyse(&mut object, &arena, false, 0.0, None);
        assert_eq!(object.dnpix, 0);
        assert_relative_eq!(object.abcor, 1.0);
    }

    #[test]
    fn test_single_row_is_singular() {
        let pixels = vec![(0, 0, 1.0), (1, 0, 1.0), (2, 0, 1.0)];
        let (arena, mut object) = build::<Bare>(&pixels, 0.0);
        analyse(&mut object, &arena, false, 0.0, None);
        assert!(object.flags.contains(ObjectFlags::SINGULAR));
        assert_relative_eq!(object.my2, 1.0 / 12.0, epsilon = 1e-9);
        assert_relative_eq!(object.mx2, 2.0 / 3.0 + 1.0 / 12.0, epsilon = 1e-9);
        assert_relative_eq!(object.theta, 0.0);
        assert!(object.a > object.b);
    }

    #[test]
    fn test_elongated_diagonal_angle() {
        let pixels = vec![
            (0, 0, 1.0),
            (1, 1, 1.0),
            (2, 2, 1.0),
            (1, 0, 0.5),
            (2, 1, 0.5),
            (0, 1, 0.5),
            (1, 2, 0.5),
        ];
        let (arena, mut object) = build::<Bare>(&pixels, 0.0);
        analyse(&mut object, &arena, false, 0.0, None);
        assert_relative_eq!(object.theta, std::f32::consts::FRAC_PI_4, epsilon = 1e-5);
        assert!(object.mxy > 0.0);
        assert!(object.cxy < 0.0);
    }

    #[test]
    fn test_errors_and_fluxerr() {
        let (arena, mut object) = build::<Noisy>(&square(4.0), 1.0);
        analyse(&mut object, &arena, false, 2.0, None);
        // 9 pixels of variance 1 plus 36/2 Poisson.
        assert_relative_eq!(object.fluxerr, (9.0f32 + 18.0).sqrt(), epsilon = 1e-5);
        // Per pixel error 1 + 4/2 = 3; Σ err·x² = 3·6 = 18 over 36².
        assert_relative_eq!(object.errx2, 18.0 / (36.0 * 36.0), epsilon = 1e-9);
        assert_relative_eq!(object.errxy, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_saturation_flag() {
        let (arena, mut object) = build::<Bare>(&square(100.0), 0.0);
        analyse(&mut object, &arena, false, 0.0, Some(150.0));
        assert!(!object.flags.contains(ObjectFlags::SATURATED));
        analyse(&mut object, &arena, false, 0.0, Some(100.0));
        assert!(object.flags.contains(ObjectFlags::SATURATED));
        analyse(&mut object, &arena, false, 0.0, None);
        assert!(!object.flags.contains(ObjectFlags::SATURATED));
    }

    #[test]
    fn test_robust_keeps_merged_barycenter() {
        let (arena, mut object) = build::<Bare>(&square(1.0), 0.0);
        object.flags |= ObjectFlags::MERGED;
        object.mx = 10.25;
        object.my = 20.5;
        analyse(&mut object, &arena, true, 0.0, None);
        assert_relative_eq!(object.mx, 10.25, epsilon = 1e-9);
        assert_relative_eq!(object.my, 20.5, epsilon = 1e-9);

        analyse(&mut object, &arena, false, 0.0, None);
        assert_relative_eq!(object.mx, 11.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mthresh_levels() {
        // Excesses over 0.5: 9.5, 7.5, 5.5, 3.5, 1.5, 0.5
        let pixels: Vec<(u32, u32, f32)> = [10.0, 8.0, 6.0, 4.0, 2.0, 1.0]
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as u32, 0, v))
            .collect();
        let (arena, mut object) = build::<Bare>(&pixels, 0.0);
        preanalyse(&mut object, &arena);
        let ladder = [1.5, 3.0, 5.0, 7.0, 9.0];
        let decision = analyse_mthresh(&mut object, &arena, 3, &ladder);
        // Third largest excess is 5.5, so mthresh = 6.0.
        assert_relative_eq!(object.mthresh, 6.0);
        assert_eq!(decision, MthreshDecision::Levels(3));
    }

    #[test]
    fn test_mthresh_skips() {
        let (arena, mut object) = build::<Bare>(&[(0, 0, 5.0), (1, 0, 5.0)], 0.0);
        preanalyse(&mut object, &arena);
        assert_eq!(
            analyse_mthresh(&mut object, &arena, 2, &[1.0]),
            MthreshDecision::Skip(SkipReason::TooSmall)
        );

        let (arena, mut object) = build::<Bare>(&square(0.4), 0.0);
        preanalyse(&mut object, &arena);
        assert_eq!(
            analyse_mthresh(&mut object, &arena, 2, &[1.0]),
            MthreshDecision::Skip(SkipReason::NoDynamicRange)
        );

        let (arena, mut object) = build::<Bare>(&square(2.0), 0.0);
        preanalyse(&mut object, &arena);
        assert_eq!(
            analyse_mthresh(&mut object, &arena, 2, &[2.5, 3.0]),
            MthreshDecision::Skip(SkipReason::NoLevelAboveMinArea)
        );
    }

    #[test]
    fn test_mean_threshold() {
        let mut arena = PixelArena::<Full>::with_capacity(4);
        let mut span = PixelSpan::EMPTY;
        for (x, t) in [(0, 1.0), (1, 2.0), (2, 6.0)] {
            let sample = PixelSample {
                value: 10.0,
                cdvalue: 10.0,
                var: 1.0,
                thresh: t,
            };
            arena.append(&mut span, PixelNode::capture(x, 0, &sample)).unwrap();
        }
        assert_eq!(mean_threshold(&arena, span), Some(3.0));

        let (bare, object) = build::<Bare>(&square(1.0), 0.0);
        assert_eq!(mean_threshold(&bare, object.span), None);
    }
}
