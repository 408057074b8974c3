//! Offline re-detection for occupied slots that ended up as sentinels.
//!
//! Each crop is a tight sub-image around one slot, named
//! `c<cell>[_x<ox>_y<oy>][_anything]` and filed under its step. The
//! detector runs on the crop with a narrowed radius band; the best-voted
//! circle, shifted back by the crop origin, overwrites the sentinel in place.

use std::collections::BTreeMap;

use image::GrayImage;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use stack_align_core::{CellId, CellStep, MeasurementStore, Step};

use crate::detector::{CircleDetector, DetectError};
use crate::profile::RadiusBand;

/// One tight crop supplied for recovery.
#[derive(Clone, Debug)]
pub struct RecoveryCrop {
    pub cell: CellId,
    pub step: Step,
    /// Position of the crop's top-left pixel in the full frame.
    pub origin: Point2<f32>,
    pub image: GrayImage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryParams {
    /// Fraction of the step band trimmed from both ends.
    pub narrow_frac: f32,
    /// Explicit per-step bands that replace the narrowed step band.
    pub bands: Vec<StepBand>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepBand {
    pub step: Step,
    pub band: RadiusBand,
}

impl Default for RecoveryParams {
    fn default() -> Self {
        Self {
            narrow_frac: 0.1,
            bands: Vec::new(),
        }
    }
}

impl RecoveryParams {
    /// Radius band used on recovery crops of `step`.
    pub fn band_for(&self, step: Step, detector: &CircleDetector) -> Result<RadiusBand, DetectError> {
        if let Some(explicit) = self.bands.iter().rev().find(|b| b.step == step) {
            return Ok(explicit.band);
        }
        Ok(detector.profile(step)?.band.narrowed(self.narrow_frac))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No measurement exists for this (cell, step).
    UnknownCell,
    /// The measurement is already valid.
    NotSentinel,
    /// The step has no detection profile.
    NoProfile,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub recovered: Vec<CellStep>,
    /// Crops that were tried but produced no circle.
    pub failed: Vec<CellStep>,
    pub skipped: Vec<(CellStep, SkipReason)>,
    /// Sentinels remaining in the store after this pass.
    pub still_missing: Vec<CellStep>,
}

/// Parse a crop file stem into its cell id and crop origin.
///
/// Accepts `c12`, `c12_x2600_y650`, and any trailing `_`-separated tokens
/// (e.g. `c12_manual`). The origin defaults to `(0, 0)`.
pub fn parse_crop_name(stem: &str) -> Option<(CellId, Point2<f32>)> {
    let mut parts = stem.split('_');
    let cell = parts.next()?.strip_prefix(['c', 'C'])?.parse().ok()?;
    let mut origin = Point2::origin();
    for part in parts {
        if let Some(x) = part.strip_prefix('x').and_then(|v| v.parse::<f32>().ok()) {
            origin.x = x;
        } else if let Some(y) = part.strip_prefix('y').and_then(|v| v.parse::<f32>().ok()) {
            origin.y = y;
        }
    }
    Some((CellId(cell), origin))
}

/// Run recovery over `crops`, overwriting revived sentinels in `store`.
pub fn recover_missing<I>(
    store: &mut MeasurementStore,
    crops: I,
    detector: &CircleDetector,
    params: &RecoveryParams,
) -> RecoveryReport
where
    I: IntoIterator<Item = RecoveryCrop>,
{
    let mut report = RecoveryReport::default();
    let mut band_cache: BTreeMap<Step, Option<RadiusBand>> = BTreeMap::new();

    for crop in crops {
        let key = CellStep::new(crop.cell, crop.step);
        match store.get(crop.cell, crop.step) {
            None => {
                log::warn!("recovery crop for unknown {} {}", crop.cell, crop.step);
                report.skipped.push((key, SkipReason::UnknownCell));
                continue;
            }
            Some(m) if !m.is_sentinel() => {
                log::debug!("{} {} already measured, crop ignored", crop.cell, crop.step);
                report.skipped.push((key, SkipReason::NotSentinel));
                continue;
            }
            Some(_) => {}
        }

        let band = *band_cache
            .entry(crop.step)
            .or_insert_with(|| params.band_for(crop.step, detector).ok());
        let Some(band) = band else {
            report.skipped.push((key, SkipReason::NoProfile));
            continue;
        };
        let preprocess = detector
            .profile(crop.step)
            .map(|p| p.preprocess)
            .unwrap_or_default();

        let found = match detector.detect_with(&crop.image, band, &preprocess) {
            Ok(found) => found,
            Err(err) => {
                log::warn!("recovery of {} {} failed: {err}", crop.cell, crop.step);
                report.failed.push(key);
                continue;
            }
        };

        let Some(best) = found.first() else {
            log::info!("no circle in recovery crop of {} {}", crop.cell, crop.step);
            report.failed.push(key);
            continue;
        };

        let center = best.center + Vector2::new(crop.origin.x, crop.origin.y);
        if store.overwrite(key, center, best.radius).is_ok() {
            log::info!(
                "recovered {} {} at ({:.1}, {:.1}) r={:.1}",
                crop.cell,
                crop.step,
                center.x,
                center.y,
                best.radius
            );
            report.recovered.push(key);
            report.failed.retain(|k| *k != key);
        }
    }

    report.still_missing = store.sentinels().map(|m| m.key()).collect();
    report
}
