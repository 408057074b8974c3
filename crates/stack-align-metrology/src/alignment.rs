//! Per-cell misalignment between two assembly steps.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use stack_align_core::{CellId, Measurement, MeasurementStore, Step};

use crate::calibration::CalibrationFactor;
use crate::thickness::ThicknessTable;

/// Offset of the target part relative to the reference part, in mm.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentOffset {
    pub dx_mm: f64,
    pub dy_mm: f64,
    pub dz_mm: f64,
}

impl AlignmentOffset {
    /// Offset from its planar components. `dx` and `dy` are kept as given;
    /// only `dz` is rounded to 3 decimals, so `dz` stays within half a
    /// micrometre of `hypot(dx, dy)`.
    pub fn from_components(dx: f64, dy: f64) -> Self {
        Self {
            dx_mm: dx,
            dy_mm: dy,
            dz_mm: round3(dx.hypot(dy)),
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Alignment of one cell between two steps. `offset == None` means at least
/// one side had no valid detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    pub cell: CellId,
    pub reference_step: Step,
    pub target_step: Step,
    pub offset: Option<AlignmentOffset>,
}

impl AlignmentRecord {
    #[inline]
    pub fn is_defined(&self) -> bool {
        self.offset.is_some()
    }
}

/// Named step pair reported per cell, e.g. `anode/cathode`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedPair {
    pub name: String,
    pub reference_step: Step,
    pub target_step: Step,
}

impl NamedPair {
    pub fn new(name: impl Into<String>, reference_step: Step, target_step: Step) -> Self {
        Self {
            name: name.into(),
            reference_step,
            target_step,
        }
    }

    /// `anode/cathode` (2 vs 6), `spring/press` (8 vs 0), `spacer/press` (7 vs 0).
    pub fn defaults() -> Vec<NamedPair> {
        [("anode/cathode", 2, 6), ("spring/press", 8, 0), ("spacer/press", 7, 0)]
            .into_iter()
            .filter_map(|(name, a, b)| Some(NamedPair::new(name, Step::new(a)?, Step::new(b)?)))
            .collect()
    }
}

/// Alignment records of one named pair, ordered by cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairAlignment {
    pub pair: NamedPair,
    pub records: Vec<AlignmentRecord>,
}

/// Converts corrected pixel centres into millimetre offsets.
#[derive(Clone, Copy, Debug)]
pub struct AlignmentCalculator<'a> {
    factor: CalibrationFactor,
    thickness: &'a ThicknessTable,
}

impl<'a> AlignmentCalculator<'a> {
    pub fn new(factor: CalibrationFactor, thickness: &'a ThicknessTable) -> Self {
        Self { factor, thickness }
    }

    fn corrected(&self, m: &Measurement) -> Option<Point2<f64>> {
        let c = m.valid_center()?;
        let c = self.thickness.correct(m.slot, m.step, c);
        Some(Point2::new(c.x as f64, c.y as f64))
    }

    /// `dx = (ref.x - target.x) * mm_per_px`, likewise `dy`. Undefined if
    /// either measurement is a sentinel.
    pub fn align(&self, reference: &Measurement, target: &Measurement) -> Option<AlignmentOffset> {
        let a = self.corrected(reference)?;
        let b = self.corrected(target)?;
        let d = a - b;
        Some(AlignmentOffset::from_components(
            self.factor.px_to_mm(d.x),
            self.factor.px_to_mm(d.y),
        ))
    }

    pub fn align_cell(
        &self,
        store: &MeasurementStore,
        cell: CellId,
        reference_step: Step,
        target_step: Step,
    ) -> AlignmentRecord {
        let offset = match (store.get(cell, reference_step), store.get(cell, target_step)) {
            (Some(a), Some(b)) => self.align(a, b),
            _ => None,
        };
        AlignmentRecord {
            cell,
            reference_step,
            target_step,
            offset,
        }
    }

    /// Every non-reference step of every cell against the cell's step 0.
    pub fn align_to_reference(&self, store: &MeasurementStore) -> Vec<AlignmentRecord> {
        store
            .iter()
            .filter(|m| !m.step.is_reference())
            .map(|m| self.align_cell(store, m.cell, Step::REFERENCE, m.step))
            .collect()
    }

    /// Named pairs for every cell in the store.
    pub fn align_pairs(&self, store: &MeasurementStore, pairs: &[NamedPair]) -> Vec<PairAlignment> {
        let cells = store.cells();
        pairs
            .iter()
            .map(|pair| {
                let records: Vec<AlignmentRecord> = cells
                    .iter()
                    .map(|&cell| self.align_cell(store, cell, pair.reference_step, pair.target_step))
                    .collect();
                let undefined = records.iter().filter(|r| !r.is_defined()).count();
                if undefined > 0 {
                    log::warn!("{}: {undefined} of {} cells undefined", pair.name, records.len());
                }
                PairAlignment {
                    pair: pair.clone(),
                    records,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;
    use stack_align_core::{BatchId, Detection, SlotId};

    fn step(i: u8) -> Step {
        Step::new(i).expect("step")
    }

    fn slot(id: u8) -> SlotId {
        SlotId::new(id).expect("slot")
    }

    fn at(cell: u32, s: u8, x: f32, y: f32) -> Measurement {
        Measurement::detected(
            BatchId(1),
            slot(1),
            CellId(cell),
            step(s),
            &Detection::new(x, y, 150.0),
        )
    }

    const FACTOR: CalibrationFactor = CalibrationFactor { mm_per_px: 0.02 };

    #[test]
    fn offset_matches_worked_example() {
        let table = ThicknessTable::new();
        let calc = AlignmentCalculator::new(FACTOR, &table);
        let off = calc
            .align(&at(1, 2, 500.0, 730.0), &at(1, 6, 515.0, 745.0))
            .expect("defined");
        assert_relative_eq!(off.dx_mm, -0.3, epsilon = 1e-12);
        assert_relative_eq!(off.dy_mm, -0.3, epsilon = 1e-12);
        assert_relative_eq!(off.dz_mm, 0.424, epsilon = 1e-12);
    }

    #[test]
    fn dz_is_the_rounded_norm_of_stored_components() {
        let off = AlignmentOffset::from_components(0.0004, 0.0004);
        assert_eq!(off.dx_mm, 0.0004);
        assert_eq!(off.dy_mm, 0.0004);
        assert_relative_eq!(off.dz_mm, 0.001, epsilon = 1e-12);

        // Deterministic sweep over signs and magnitudes from micrometres to
        // centimetres.
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        };
        for i in 0..2000 {
            let scale = 10f64.powi(i % 5 - 3);
            let off = AlignmentOffset::from_components(next() * scale, next() * scale);
            let norm = off.dx_mm.hypot(off.dy_mm);
            assert!(
                (off.dz_mm - norm).abs() <= 5e-4 + 1e-12,
                "dx={} dy={} dz={}",
                off.dx_mm,
                off.dy_mm,
                off.dz_mm
            );
        }
    }

    #[test]
    fn sentinel_makes_record_undefined() {
        let table = ThicknessTable::new();
        let calc = AlignmentCalculator::new(FACTOR, &table);
        let mut store = MeasurementStore::new();
        store.insert(at(1, 0, 500.0, 400.0)).expect("insert");
        store
            .insert(Measurement::sentinel(BatchId(1), slot(1), CellId(1), step(8)))
            .expect("insert");

        let rec = calc.align_cell(&store, CellId(1), step(8), step(0));
        assert_eq!(rec.offset, None);
        let missing = calc.align_cell(&store, CellId(1), step(7), step(0));
        assert_eq!(missing.offset, None);

        let json = serde_json::to_value(&rec).expect("json");
        assert!(json["offset"].is_null());
    }

    #[test]
    fn thickness_correction_applies_before_conversion() {
        let mut table = ThicknessTable::new();
        table.set(slot(1), step(7), Vector2::new(5.0, 0.0));
        let calc = AlignmentCalculator::new(FACTOR, &table);
        let off = calc
            .align(&at(1, 7, 505.0, 400.0), &at(1, 0, 500.0, 400.0))
            .expect("defined");
        assert_eq!(off.dx_mm, 0.0);
        assert_eq!(off.dz_mm, 0.0);
    }

    #[test]
    fn named_pairs_cover_every_cell() {
        let table = ThicknessTable::new();
        let calc = AlignmentCalculator::new(FACTOR, &table);
        let mut store = MeasurementStore::new();
        for cell in [1, 2] {
            store.insert(at(cell, 0, 500.0, 400.0)).expect("insert");
            store.insert(at(cell, 2, 500.0, 400.0)).expect("insert");
        }
        store.insert(at(1, 6, 510.0, 400.0)).expect("insert");

        let pairs = NamedPair::defaults();
        assert_eq!(pairs.len(), 3);
        let out = calc.align_pairs(&store, &pairs[..1]);
        assert_eq!(out[0].pair.name, "anode/cathode");
        assert_eq!(out[0].records.len(), 2);
        let c1 = out[0].records[0].offset.expect("cell 1 defined");
        assert_relative_eq!(c1.dx_mm, -0.2, epsilon = 1e-12);
        assert!(out[0].records[1].offset.is_none());

        let vs_ref = calc.align_to_reference(&store);
        assert_eq!(vs_ref.len(), 3);
        assert!(vs_ref.iter().all(|r| r.reference_step == Step::REFERENCE));
    }
}
