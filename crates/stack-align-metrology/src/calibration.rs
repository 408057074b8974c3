//! Pixel → millimetre scale from step-0 references.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stack_align_core::{BatchId, MeasurementStore, SlotId, Step};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Physical reference used to derive the scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationStrategy {
    /// Known diameter of the step-0 pressing tool.
    ReferenceDiameter { diameter_mm: f64 },
    /// Known centre-to-centre distance between two press slots.
    SlotSpacing {
        slot_a: SlotId,
        slot_b: SlotId,
        spacing_mm: f64,
    },
}

impl Default for CalibrationStrategy {
    fn default() -> Self {
        Self::ReferenceDiameter { diameter_mm: 20.0 }
    }
}

impl CalibrationStrategy {
    fn reference_mm(&self) -> f64 {
        match *self {
            Self::ReferenceDiameter { diameter_mm } => diameter_mm,
            Self::SlotSpacing { spacing_mm, .. } => spacing_mm,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("reference length must be positive and finite, got {0}")]
    InvalidLength(f64),
    #[error("no valid step-0 measurement to calibrate from")]
    NoReference,
    #[error("no batch has valid step-0 centres in both {0} and {1}")]
    NoSlotPair(SlotId, SlotId),
    #[error("calibration slots must differ, got {0} twice")]
    SameSlot(SlotId),
    #[error("degenerate pixel reference ({0} px)")]
    Degenerate(f64),
}

/// Run-wide millimetre-per-pixel scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFactor {
    pub mm_per_px: f64,
}

impl CalibrationFactor {
    #[inline]
    pub fn px_to_mm(&self, px: f64) -> f64 {
        px * self.mm_per_px
    }
}

/// Compute the scale from the step-0 measurements in `store`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(store), fields(records = store.len()))
)]
pub fn calibrate(
    store: &MeasurementStore,
    strategy: &CalibrationStrategy,
) -> Result<CalibrationFactor, CalibrationError> {
    let length = strategy.reference_mm();
    if !length.is_finite() || length <= 0.0 {
        return Err(CalibrationError::InvalidLength(length));
    }

    let reference_px = match *strategy {
        CalibrationStrategy::ReferenceDiameter { .. } => mean_diameter_px(store)?,
        CalibrationStrategy::SlotSpacing { slot_a, slot_b, .. } => {
            median_spacing_px(store, slot_a, slot_b)?
        }
    };
    if !reference_px.is_finite() || reference_px <= 0.0 {
        return Err(CalibrationError::Degenerate(reference_px));
    }

    let factor = CalibrationFactor {
        mm_per_px: length / reference_px,
    };
    log::info!(
        "calibration: {length} mm over {reference_px:.2} px -> {:.5} mm/px",
        factor.mm_per_px
    );
    Ok(factor)
}

fn mean_diameter_px(store: &MeasurementStore) -> Result<f64, CalibrationError> {
    let radii: Vec<f64> = store
        .step(Step::REFERENCE)
        .filter(|m| m.valid)
        .map(|m| m.radius as f64)
        .collect();
    if radii.is_empty() {
        return Err(CalibrationError::NoReference);
    }
    Ok(2.0 * radii.iter().sum::<f64>() / radii.len() as f64)
}

fn median_spacing_px(
    store: &MeasurementStore,
    slot_a: SlotId,
    slot_b: SlotId,
) -> Result<f64, CalibrationError> {
    if slot_a == slot_b {
        return Err(CalibrationError::SameSlot(slot_a));
    }

    let mut per_batch: BTreeMap<BatchId, [Option<(f64, f64)>; 2]> = BTreeMap::new();
    let mut any_valid = false;
    for m in store.step(Step::REFERENCE).filter(|m| m.valid) {
        any_valid = true;
        let idx = if m.slot == slot_a {
            0
        } else if m.slot == slot_b {
            1
        } else {
            continue;
        };
        per_batch.entry(m.batch).or_default()[idx] =
            Some((m.center.x as f64, m.center.y as f64));
    }
    if !any_valid {
        return Err(CalibrationError::NoReference);
    }

    let mut distances: Vec<f64> = per_batch
        .values()
        .filter_map(|pair| match pair {
            [Some(a), Some(b)] => Some((a.0 - b.0).hypot(a.1 - b.1)),
            _ => None,
        })
        .collect();
    if distances.is_empty() {
        return Err(CalibrationError::NoSlotPair(slot_a, slot_b));
    }
    distances.sort_by(f64::total_cmp);
    let n = distances.len();
    Ok(if n % 2 == 1 {
        distances[n / 2]
    } else {
        0.5 * (distances[n / 2 - 1] + distances[n / 2])
    })
}
