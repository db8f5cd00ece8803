//! Removal of spurious detections in the wings of brighter neighbours.
//!
//! Each object is modelled as an elliptical profile
//! `amp · (1 + alpha · r²)^(-beta)`, where `r²` uses the object's ellipse
//! coefficients. `amp` follows from the filtered flux over the isophotal
//! ellipse and `alpha` is chosen so the profile drops to the detection
//! threshold over the object's pixel count. A fainter object close to a
//! brighter one is dropped when the brighter profile at its barycenter
//! exceeds the fainter object's `mthresh`.

use std::f64::consts::PI;

use super::object::Object;

/// Neighbourhood searched around each object, in units of `a1 + a2`.
pub const CLEAN_ZONE: f64 = 10.0;

/// Profile values at or above this `1 + alpha·r²` are treated as zero.
const CLEAN_FAR: f64 = 1e10;

/// Elliptical profile of one object.
#[derive(Debug, Clone, Copy)]
struct Profile {
    amp: f64,
    alpha: f64,
}

impl Profile {
    /// `None` when the object has no usable area, pixels or threshold.
    fn of(object: &Object, beta: f64) -> Option<Self> {
        let unit_area = PI * object.a as f64 * object.b as f64;
        let abcor = object.abcor as f64;
        let thresh = object.thresh as f64;
        if !(unit_area > 0.0) || !(abcor > 0.0) || !(thresh > 0.0) || object.fdnpix == 0 {
            return None;
        }
        let amp = object.fdflux as f64 / (2.0 * unit_area * abcor);
        let alpha = ((amp / thresh).powf(1.0 / beta) - 1.0) * unit_area / object.fdnpix as f64;
        (amp.is_finite() && alpha.is_finite()).then_some(Self { amp, alpha })
    }

    /// Whether this profile, centred on `bright`, rises above `faint.mthresh`
    /// at offset `(dx, dy)` from the bright barycenter.
    fn swamps(&self, bright: &Object, faint: &Object, dx: f64, dy: f64, beta: f64) -> bool {
        let r2 = bright.cxx as f64 * dx * dx + bright.cyy as f64 * dy * dy + bright.cxy as f64 * dx * dy;
        let val = 1.0 + self.alpha * r2;
        if !(val > 1.0) {
            return false;
        }
        let level = if val < CLEAN_FAR {
            self.amp * val.powf(-beta)
        } else {
            0.0
        };
        level as f32 > faint.mthresh
    }
}

/// Flag the objects that survive cleaning.
///
/// Pairs are visited in list order. Of two neighbours the one with the
/// larger filtered flux may remove the other; ties go to the later object.
/// An object removed by an earlier pair is skipped by later ones.
/// `beta` is the profile's power-law index and must be positive.
pub fn clean(objects: &[Object], beta: f64) -> Vec<bool> {
    let mut survives = vec![true; objects.len()];
    let profiles: Vec<Option<Profile>> = objects.iter().map(|o| Profile::of(o, beta)).collect();
    let zone2 = CLEAN_ZONE * CLEAN_ZONE;

    for i in 0..objects.len() {
        if !survives[i] {
            continue;
        }
        let first = &objects[i];
        for j in i + 1..objects.len() {
            if !survives[j] {
                continue;
            }
            let second = &objects[j];
            let dx = first.mx - second.mx;
            let dy = first.my - second.my;
            let reach = first.a as f64 + second.a as f64;
            if dx * dx + dy * dy >= reach * reach * zone2 {
                continue;
            }
            if second.fdflux < first.fdflux {
                if profiles[i].map_or(false, |p| p.swamps(first, second, dx, dy, beta)) {
                    survives[j] = false;
                }
            } else if profiles[j].map_or(false, |p| p.swamps(second, first, dx, dy, beta)) {
                survives[i] = false;
            }
        }
    }

    let removed = survives.iter().filter(|&&kept| !kept).count();
    if removed > 0 {
        log::debug!("cleaning removed {removed} of {} objects", objects.len());
    }
    survives
}
