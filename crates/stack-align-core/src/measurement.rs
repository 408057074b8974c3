use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, CellId, SlotId, Step};

/// Candidate circle from the detector, in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub center: Point2<f32>,
    pub radius: f32,
    /// Accumulator votes of the centre peak.
    pub votes: u32,
}

impl Detection {
    pub fn new(x: f32, y: f32, radius: f32) -> Self {
        Self {
            center: Point2::new(x, y),
            radius,
            votes: 0,
        }
    }
}

/// Store key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CellStep {
    pub cell: CellId,
    pub step: Step,
}

impl CellStep {
    pub fn new(cell: CellId, step: Step) -> Self {
        Self { cell, step }
    }
}

/// Canonical record for one (cell, step).
///
/// A sentinel has centre `(0, 0)`, radius `0` and `valid == false`; it stands
/// for an occupied slot without a usable detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub batch: BatchId,
    pub slot: SlotId,
    pub cell: CellId,
    pub step: Step,
    pub center: Point2<f32>,
    pub radius: f32,
    pub valid: bool,
}

impl Measurement {
    pub fn detected(batch: BatchId, slot: SlotId, cell: CellId, step: Step, det: &Detection) -> Self {
        Self {
            batch,
            slot,
            cell,
            step,
            center: det.center,
            radius: det.radius,
            valid: true,
        }
    }

    pub fn sentinel(batch: BatchId, slot: SlotId, cell: CellId, step: Step) -> Self {
        Self {
            batch,
            slot,
            cell,
            step,
            center: Point2::origin(),
            radius: 0.0,
            valid: false,
        }
    }

    #[inline]
    pub fn is_sentinel(&self) -> bool {
        !self.valid
    }

    pub fn key(&self) -> CellStep {
        CellStep::new(self.cell, self.step)
    }

    /// Centre if this is a real detection.
    pub fn valid_center(&self) -> Option<Point2<f32>> {
        self.valid.then_some(self.center)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("measurement for cell {} step {} already recorded", .0.cell, .0.step)]
    Duplicate(CellStep),
    #[error("no measurement for cell {} step {}", .0.cell, .0.step)]
    Missing(CellStep),
}

/// All measurements of a run, keyed by (cell, step).
///
/// Records are inserted once; the only mutation afterwards is
/// [`MeasurementStore::overwrite`], used by missing-detection recovery.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Measurement>", into = "Vec<Measurement>")]
pub struct MeasurementStore {
    records: BTreeMap<CellStep, Measurement>,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, m: Measurement) -> Result<(), StoreError> {
        match self.records.entry(m.key()) {
            Entry::Occupied(e) => Err(StoreError::Duplicate(*e.key())),
            Entry::Vacant(e) => {
                e.insert(m);
                Ok(())
            }
        }
    }

    /// Replace a record's centre and radius in place and mark it valid.
    pub fn overwrite(
        &mut self,
        key: CellStep,
        center: Point2<f32>,
        radius: f32,
    ) -> Result<&Measurement, StoreError> {
        let m = self.records.get_mut(&key).ok_or(StoreError::Missing(key))?;
        m.center = center;
        m.radius = radius;
        m.valid = true;
        Ok(m)
    }

    pub fn get(&self, cell: CellId, step: Step) -> Option<&Measurement> {
        self.records.get(&CellStep::new(cell, step))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered by (cell, step).
    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.records.values()
    }

    pub fn step(&self, step: Step) -> impl Iterator<Item = &Measurement> {
        self.records.values().filter(move |m| m.step == step)
    }

    pub fn sentinels(&self) -> impl Iterator<Item = &Measurement> {
        self.records.values().filter(|m| m.is_sentinel())
    }

    pub fn cells(&self) -> BTreeSet<CellId> {
        self.records.keys().map(|k| k.cell).collect()
    }

    pub fn steps(&self) -> BTreeSet<Step> {
        self.records.keys().map(|k| k.step).collect()
    }
}

impl TryFrom<Vec<Measurement>> for MeasurementStore {
    type Error = StoreError;

    fn try_from(records: Vec<Measurement>) -> Result<Self, Self::Error> {
        let mut store = Self::new();
        for m in records {
            store.insert(m)?;
        }
        Ok(store)
    }
}

impl From<MeasurementStore> for Vec<Measurement> {
    fn from(store: MeasurementStore) -> Self {
        store.records.into_values().collect()
    }
}
