//! Candidate -> press slot assignment.
//!
//! Candidates are scanned in detector order. A candidate is assigned when
//! its radius is in band and its centre falls inside exactly one slot ROI of
//! an occupied slot that is still empty. Everything else is rejected with a
//! reason; rejected candidates never reach the measurement store or the
//! diagnostic overlay.
//!
//! When one ROI holds two real circles only the first scanned one is kept,
//! not the one closest to the ROI centre.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use stack_align_core::{Detection, SlotId, SlotTable};

use crate::profile::RadiusBand;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "slot")]
pub enum RejectReason {
    RadiusOutOfBand,
    OutsideRoi,
    /// Centre lies inside more than one ROI.
    AmbiguousRoi,
    UnoccupiedSlot(SlotId),
    /// An earlier candidate already filled this slot.
    SlotAlreadyFilled(SlotId),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub detection: Detection,
    pub reason: RejectReason,
}

/// Outcome of assigning one frame's candidates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub assigned: BTreeMap<SlotId, Detection>,
    pub rejected: Vec<RejectedCandidate>,
}

impl SlotAssignment {
    /// Occupied slots that received no detection.
    pub fn unfilled(&self, occupied: &BTreeSet<SlotId>) -> Vec<SlotId> {
        occupied
            .iter()
            .copied()
            .filter(|s| !self.assigned.contains_key(s))
            .collect()
    }
}

pub fn assign_to_slots(
    candidates: &[Detection],
    slots: &SlotTable,
    occupied: &BTreeSet<SlotId>,
    band: RadiusBand,
) -> SlotAssignment {
    let mut out = SlotAssignment::default();

    for det in candidates {
        let verdict = classify(det, slots, occupied, band, &out.assigned);
        match verdict {
            Ok(slot) => {
                out.assigned.insert(slot, *det);
            }
            Err(reason) => {
                log::debug!(
                    "rejected circle ({:.0}, {:.0}) r={:.0}: {:?}",
                    det.center.x,
                    det.center.y,
                    det.radius,
                    reason
                );
                out.rejected.push(RejectedCandidate {
                    detection: *det,
                    reason,
                });
            }
        }
    }

    out
}

fn classify(
    det: &Detection,
    slots: &SlotTable,
    occupied: &BTreeSet<SlotId>,
    band: RadiusBand,
    assigned: &BTreeMap<SlotId, Detection>,
) -> Result<SlotId, RejectReason> {
    if !band.contains(det.radius) {
        return Err(RejectReason::RadiusOutOfBand);
    }

    let mut hits = slots.slots_containing(det.center);
    let slot = match (hits.next(), hits.next()) {
        (None, _) => return Err(RejectReason::OutsideRoi),
        (Some(_), Some(_)) => return Err(RejectReason::AmbiguousRoi),
        (Some(def), None) => def.id,
    };

    if !occupied.contains(&slot) {
        return Err(RejectReason::UnoccupiedSlot(slot));
    }
    if assigned.contains_key(&slot) {
        return Err(RejectReason::SlotAlreadyFilled(slot));
    }
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack_align_core::{Roi, SlotDef};

    fn slot(id: u8) -> SlotId {
        SlotId::new(id).expect("slot")
    }

    fn single_roi_table() -> SlotTable {
        SlotTable::new(vec![SlotDef {
            id: slot(2),
            label: "press 2".into(),
            roi: Roi::new(2600.0, 650.0, 2760.0, 800.0),
        }])
        .expect("table")
    }

    fn all_occupied() -> BTreeSet<SlotId> {
        SlotId::all().collect()
    }

    const BAND: RadiusBand = RadiusBand::new(140.0, 180.0);

    #[test]
    fn in_roi_candidate_is_assigned_and_outside_is_rejected() {
        let table = single_roi_table();
        let inside = Detection::new(2650.0, 700.0, 150.0);
        let outside = Detection::new(2800.0, 700.0, 150.0);

        let res = assign_to_slots(&[inside, outside], &table, &all_occupied(), BAND);
        assert_eq!(res.assigned.get(&slot(2)), Some(&inside));
        assert_eq!(res.rejected.len(), 1);
        assert_eq!(res.rejected[0].detection, outside);
        assert_eq!(res.rejected[0].reason, RejectReason::OutsideRoi);
    }

    #[test]
    fn first_candidate_wins_a_slot() {
        let table = single_roi_table();
        let first = Detection::new(2740.0, 790.0, 150.0);
        let second = Detection::new(2680.0, 725.0, 150.0);

        let res = assign_to_slots(&[first, second], &table, &all_occupied(), BAND);
        assert_eq!(res.assigned.get(&slot(2)), Some(&first));
        assert_eq!(
            res.rejected[0].reason,
            RejectReason::SlotAlreadyFilled(slot(2))
        );
    }

    #[test]
    fn radius_and_occupancy_gate_assignment() {
        let table = SlotTable::default();
        let occupied: BTreeSet<SlotId> = [slot(1), slot(2)].into_iter().collect();
        let small = Detection::new(500.0, 400.0, 100.0);
        let unoccupied = Detection::new(5000.0, 400.0, 150.0);
        let ok = Detection::new(3000.0, 450.0, 160.0);

        let res = assign_to_slots(&[small, unoccupied, ok], &table, &occupied, BAND);
        assert_eq!(res.assigned.len(), 1);
        assert_eq!(res.assigned.get(&slot(2)), Some(&ok));
        let reasons: Vec<RejectReason> = res.rejected.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::RadiusOutOfBand,
                RejectReason::UnoccupiedSlot(slot(3))
            ]
        );
        assert_eq!(res.unfilled(&occupied), vec![slot(1)]);
    }

    #[test]
    fn overlapping_rois_reject_as_ambiguous() {
        let table = SlotTable::default();
        let on_seam = Detection::new(4000.0, 300.0, 150.0);
        let res = assign_to_slots(&[on_seam], &table, &all_occupied(), BAND);
        assert!(res.assigned.is_empty());
        assert_eq!(res.rejected[0].reason, RejectReason::AmbiguousRoi);
    }

    #[test]
    fn five_of_six_leaves_one_unfilled() {
        let table = SlotTable::default();
        let occupied = all_occupied();
        let centers = [
            (500.0, 450.0),
            (3000.0, 450.0),
            (5000.0, 450.0),
            (500.0, 3200.0),
            (3000.0, 3200.0),
        ];
        let dets: Vec<Detection> = centers
            .iter()
            .map(|&(x, y)| Detection::new(x, y, 160.0))
            .collect();
        let res = assign_to_slots(&dets, &table, &occupied, BAND);
        assert_eq!(res.assigned.len(), 5);
        assert_eq!(res.unfilled(&occupied), vec![slot(6)]);
    }
}
