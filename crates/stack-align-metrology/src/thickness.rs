//! Stack-height parallax correction.
//!
//! A part sitting higher in the stack appears shifted in the image, by an
//! amount that depends on where the slot sits relative to the optical axis.
//! The shift is tabulated per (slot, step) in pixels and subtracted from the
//! apparent centre before converting to millimetres. Absent keys mean no
//! shift.

use std::collections::BTreeMap;

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use stack_align_core::{SlotId, Step};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThicknessEntry {
    pub slot: SlotId,
    pub step: Step,
    pub dx: f32,
    pub dy: f32,
}

/// Correction vectors in pixels keyed by (slot, step).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ThicknessEntry>", into = "Vec<ThicknessEntry>")]
pub struct ThicknessTable {
    offsets: BTreeMap<(SlotId, Step), Vector2<f32>>,
}

impl ThicknessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, slot: SlotId, step: Step, offset: Vector2<f32>) {
        self.offsets.insert((slot, step), offset);
    }

    /// Correction for (slot, step); zero when not tabulated.
    pub fn offset(&self, slot: SlotId, step: Step) -> Vector2<f32> {
        self.offsets
            .get(&(slot, step))
            .copied()
            .unwrap_or_else(Vector2::zeros)
    }

    /// Apparent centre → corrected centre.
    #[inline]
    pub fn correct(&self, slot: SlotId, step: Step, center: Point2<f32>) -> Point2<f32> {
        center - self.offset(slot, step)
    }

    /// Inverse of [`ThicknessTable::correct`].
    #[inline]
    pub fn restore(&self, slot: SlotId, step: Step, center: Point2<f32>) -> Point2<f32> {
        center + self.offset(slot, step)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Build the table from per-slot drift rates and per-step stack heights:
    /// `offset(slot, step) = rate(slot) * height(step)`.
    pub fn from_drift(model: &DriftModel) -> Self {
        let mut table = Self::new();
        for rate in &model.rates {
            for h in &model.heights {
                let v = Vector2::new(rate.dx_per_mm, rate.dy_per_mm) * h.height_mm;
                table.set(rate.slot, h.step, v);
            }
        }
        table
    }
}

impl From<Vec<ThicknessEntry>> for ThicknessTable {
    fn from(list: Vec<ThicknessEntry>) -> Self {
        let mut table = Self::new();
        for e in list {
            table.set(e.slot, e.step, Vector2::new(e.dx, e.dy));
        }
        table
    }
}

impl From<ThicknessTable> for Vec<ThicknessEntry> {
    fn from(table: ThicknessTable) -> Self {
        table
            .offsets
            .into_iter()
            .map(|((slot, step), v)| ThicknessEntry {
                slot,
                step,
                dx: v.x,
                dy: v.y,
            })
            .collect()
    }
}

/// Apparent drift of a slot in pixels per millimetre of stack height.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotDrift {
    pub slot: SlotId,
    pub dx_per_mm: f32,
    pub dy_per_mm: f32,
}

/// Stack height below the part photographed at `step`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepHeight {
    pub step: Step,
    pub height_mm: f32,
}

/// Parametric form of the correction table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftModel {
    pub rates: Vec<SlotDrift>,
    pub heights: Vec<StepHeight>,
}

/// Where the correction table comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThicknessSource {
    /// Explicit vectors.
    Table { entries: ThicknessTable },
    /// Derived from a [`DriftModel`].
    Drift(DriftModel),
}

impl Default for ThicknessSource {
    fn default() -> Self {
        Self::Table {
            entries: ThicknessTable::new(),
        }
    }
}

impl ThicknessSource {
    pub fn table(&self) -> ThicknessTable {
        match self {
            Self::Table { entries } => entries.clone(),
            Self::Drift(model) => ThicknessTable::from_drift(model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn slot(id: u8) -> SlotId {
        SlotId::new(id).expect("slot")
    }

    fn step(i: u8) -> Step {
        Step::new(i).expect("step")
    }

    #[test]
    fn missing_key_is_zero_shift() {
        let table = ThicknessTable::new();
        let p = Point2::new(812.5, 3011.0);
        assert_eq!(table.correct(slot(4), step(7), p), p);
    }

    #[test]
    fn correct_then_restore_is_identity() {
        let mut table = ThicknessTable::new();
        table.set(slot(4), step(7), Vector2::new(3.0, 3.0));
        table.set(slot(2), step(4), Vector2::new(0.0, 6.875));
        for (s, t, p) in [
            (slot(4), step(7), Point2::new(640.25, 3100.5)),
            (slot(2), step(4), Point2::new(2680.0, 725.0)),
            (slot(6), step(9), Point2::new(5000.0, 3200.0)),
        ] {
            let corrected = table.correct(s, t, p);
            let back = table.restore(s, t, corrected);
            assert_relative_eq!(back.x, p.x, epsilon = 1e-3);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-3);
        }
        assert_eq!(
            table.correct(slot(4), step(7), Point2::new(10.0, 10.0)),
            Point2::new(7.0, 7.0)
        );
    }

    #[test]
    fn drift_model_scales_rates_by_height() {
        let model = DriftModel {
            rates: vec![SlotDrift {
                slot: slot(2),
                dx_per_mm: 0.0,
                dy_per_mm: 5.5,
            }],
            heights: vec![StepHeight {
                step: step(4),
                height_mm: 1.25,
            }],
        };
        let table = ThicknessTable::from_drift(&model);
        assert_eq!(table.len(), 1);
        assert_relative_eq!(table.offset(slot(2), step(4)).y, 6.875, epsilon = 1e-6);
    }

    #[test]
    fn table_json_is_a_list() {
        let json = r#"{"kind": "table", "entries": [{"slot": 5, "step": 7, "dx": 0.0, "dy": 3.0}]}"#;
        let src: ThicknessSource = serde_json::from_str(json).expect("parse");
        let table = src.table();
        assert_eq!(table.offset(slot(5), step(7)), Vector2::new(0.0, 3.0));
    }
}
