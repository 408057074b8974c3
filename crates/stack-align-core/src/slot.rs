use std::collections::BTreeSet;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::ids::SlotId;

/// Axis-aligned pixel rectangle. Containment is inclusive on all edges.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl Roi {
    pub const fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    #[inline]
    pub fn contains(&self, p: Point2<f32>) -> bool {
        p.x >= self.x_min && p.x <= self.x_max && p.y >= self.y_min && p.y <= self.y_max
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    fn is_valid(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
            && self.x_max > self.x_min
            && self.y_max > self.y_min
    }
}

/// One named press slot with its fixed region of interest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlotDef {
    pub id: SlotId,
    pub label: String,
    pub roi: Roi,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SlotTableError {
    #[error("slot {0} defined twice")]
    DuplicateSlot(SlotId),
    #[error("slot {0} has an empty or non-finite ROI")]
    InvalidRoi(SlotId),
}

/// Ordered list of slot definitions.
///
/// The default table splits the sensor into a top row (`y <= 900`) and a
/// bottom row (`y >= 2500`), each with a left (`x <= 1000`), middle
/// (`2000..=4000`) and right (`x >= 4000`) column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SlotDef>", into = "Vec<SlotDef>")]
pub struct SlotTable {
    slots: Vec<SlotDef>,
}

impl SlotTable {
    pub fn new(slots: Vec<SlotDef>) -> Result<Self, SlotTableError> {
        let mut seen = BTreeSet::new();
        for s in &slots {
            if !seen.insert(s.id) {
                return Err(SlotTableError::DuplicateSlot(s.id));
            }
            if !s.roi.is_valid() {
                return Err(SlotTableError::InvalidRoi(s.id));
            }
        }
        Ok(Self { slots })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotDef> {
        self.slots.iter()
    }

    pub fn get(&self, id: SlotId) -> Option<&SlotDef> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// All slots whose ROI contains `p`, in table order.
    pub fn slots_containing(&self, p: Point2<f32>) -> impl Iterator<Item = &SlotDef> + '_ {
        self.slots.iter().filter(move |s| s.roi.contains(p))
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        const ROWS: [(f32, f32, &str); 2] = [(0.0, 900.0, "top"), (2500.0, 4000.0, "bottom")];
        const COLS: [(f32, f32, &str); 3] = [
            (0.0, 1000.0, "left"),
            (2000.0, 4000.0, "middle"),
            (4000.0, 6000.0, "right"),
        ];
        let slots = SlotId::all()
            .map(|id| {
                let (row, col) = id.grid_position();
                let (y0, y1, row_name) = ROWS[row as usize];
                let (x0, x1, col_name) = COLS[col as usize];
                SlotDef {
                    id,
                    label: format!("press {} ({row_name} {col_name})", id.get()),
                    roi: Roi::new(x0, y0, x1, y1),
                }
            })
            .collect();
        Self { slots }
    }
}

impl TryFrom<Vec<SlotDef>> for SlotTable {
    type Error = SlotTableError;

    fn try_from(slots: Vec<SlotDef>) -> Result<Self, Self::Error> {
        Self::new(slots)
    }
}

impl From<SlotTable> for Vec<SlotDef> {
    fn from(table: SlotTable) -> Self {
        table.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: u8) -> SlotId {
        SlotId::new(id).expect("slot")
    }

    #[test]
    fn roi_containment_is_inclusive() {
        let roi = Roi::new(2600.0, 650.0, 2760.0, 800.0);
        assert!(roi.contains(Point2::new(2650.0, 700.0)));
        assert!(roi.contains(Point2::new(2600.0, 800.0)));
        assert!(!roi.contains(Point2::new(2800.0, 700.0)));
        assert!(!roi.contains(Point2::new(2650.0, 649.9)));
    }

    #[test]
    fn default_table_has_six_row_major_slots() {
        let table = SlotTable::default();
        let ids: Vec<u8> = table.iter().map(|s| s.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

        let hits: Vec<SlotId> = table
            .slots_containing(Point2::new(500.0, 3000.0))
            .map(|s| s.id)
            .collect();
        assert_eq!(hits, vec![slot(4)]);

        let gap = Point2::new(1500.0, 400.0);
        assert_eq!(table.slots_containing(gap).count(), 0);
    }

    #[test]
    fn rejects_duplicate_and_degenerate_slots() {
        let def = |id, roi| SlotDef {
            id: slot(id),
            label: String::new(),
            roi,
        };
        let ok = Roi::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(
            SlotTable::new(vec![def(1, ok), def(1, ok)]),
            Err(SlotTableError::DuplicateSlot(slot(1)))
        );
        assert_eq!(
            SlotTable::new(vec![def(2, Roi::new(5.0, 0.0, 5.0, 10.0))]),
            Err(SlotTableError::InvalidRoi(slot(2)))
        );
    }

    #[test]
    fn table_round_trips_through_json_list() {
        let table = SlotTable::default();
        let json = serde_json::to_string(&table).expect("serialize");
        assert!(json.starts_with('['));
        let back: SlotTable = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, table);
    }
}
