use std::fmt;

use serde::{Deserialize, Serialize};

/// One assembly stage at which a photograph is taken.
///
/// Steps run from `0` (empty pressing tool) to [`Step::MAX`] (cell after
/// pressing):
///
/// | step | part |
/// |---|---|
/// | 0 | pressing tool |
/// | 1 | bottom part |
/// | 2 | anode |
/// | 3 | separator (not photographed) |
/// | 4 | electrolyte |
/// | 5 | spare part slot |
/// | 6 | cathode |
/// | 7 | spacer |
/// | 8 | spring |
/// | 9 | top part |
/// | 10 | after pressing |
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Step(u8);

impl Step {
    /// Step 0: the empty pressing tool, used as calibration and alignment reference.
    pub const REFERENCE: Step = Step(0);
    pub const MAX: u8 = 10;

    pub fn new(index: u8) -> Option<Self> {
        (index <= Self::MAX).then_some(Step(index))
    }

    #[inline]
    pub fn index(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_reference(self) -> bool {
        self == Self::REFERENCE
    }

    /// Human readable part name photographed at this step.
    pub fn part_name(self) -> &'static str {
        match self.0 {
            0 => "pressing tool",
            1 => "bottom part",
            2 => "anode",
            3 => "separator",
            4 => "electrolyte",
            5 => "spare",
            6 => "cathode",
            7 => "spacer",
            8 => "spring",
            9 => "top part",
            _ => "after pressing",
        }
    }

    pub fn all() -> impl Iterator<Item = Step> {
        (0..=Self::MAX).map(Step)
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Step::new(index).ok_or_else(|| format!("step {index} out of range 0..={}", Step::MAX))
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> Self {
        step.0
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Physical press position under the camera, `1..=6`, row-major
/// (`1, 2, 3` top row, `4, 5, 6` bottom row).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotId(u8);

impl SlotId {
    pub const COUNT: u8 = 6;

    pub fn new(id: u8) -> Option<Self> {
        (1..=Self::COUNT).contains(&id).then_some(SlotId(id))
    }

    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based `(row, column)` of this slot in the 2 x 3 press layout.
    pub fn grid_position(self) -> (u8, u8) {
        let k = self.0 - 1;
        (k / 3, k % 3)
    }

    pub fn all() -> impl Iterator<Item = SlotId> {
        (1..=Self::COUNT).map(SlotId)
    }
}

impl TryFrom<u8> for SlotId {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        SlotId::new(id).ok_or_else(|| format!("slot {id} out of range 1..={}", SlotId::COUNT))
    }
}

impl From<SlotId> for u8 {
    fn from(slot: SlotId) -> Self {
        slot.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{:02}", self.0)
    }
}

/// Cell identity as named in the recipe, bound to a slot at step 0.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub u32);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{:02}", self.0)
    }
}

/// Batch of up to six cells pressed together, identified by its lowest cell id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u32);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
