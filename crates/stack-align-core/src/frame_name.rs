//! Frame file-name grammar.
//!
//! A frame stem is a `_`-separated list of `p<slot>c<cell>s<step>` tokens,
//! one per occupied press slot, e.g. `p01c01s0_p03c02s0_p05c03s0`. All
//! tokens of one frame carry the same step.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, CellId, SlotId, Step};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameNameError {
    #[error("frame name is empty")]
    Empty,
    #[error("malformed token `{0}` (expected p<slot>c<cell>s<step>)")]
    MalformedToken(String),
    #[error("slot {0} out of range 1..=6")]
    SlotOutOfRange(u32),
    #[error("step {0} out of range 0..=10")]
    StepOutOfRange(u32),
    #[error("tokens disagree on the step ({first} vs {other})")]
    MixedSteps { first: u8, other: u8 },
    #[error("slot {0} named twice")]
    DuplicateSlot(SlotId),
    #[error("cell {0} named twice")]
    DuplicateCell(CellId),
}

/// One `p<slot>c<cell>s<step>` token.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SlotToken {
    pub slot: SlotId,
    pub cell: CellId,
    pub step: Step,
}

impl SlotToken {
    fn parse(token: &str) -> Result<Self, FrameNameError> {
        let malformed = || FrameNameError::MalformedToken(token.to_string());
        let rest = token.strip_prefix(['p', 'P']).ok_or_else(malformed)?;
        let (slot, rest) = rest.split_once(['c', 'C']).ok_or_else(malformed)?;
        let (cell, step) = rest.split_once(['s', 'S']).ok_or_else(malformed)?;

        let slot = parse_number(slot).ok_or_else(malformed)?;
        let cell = parse_number(cell).ok_or_else(malformed)?;
        let step = parse_number(step).ok_or_else(malformed)?;

        let slot = u8::try_from(slot)
            .ok()
            .and_then(SlotId::new)
            .ok_or(FrameNameError::SlotOutOfRange(slot))?;
        let step = u8::try_from(step)
            .ok()
            .and_then(Step::new)
            .ok_or(FrameNameError::StepOutOfRange(step))?;

        Ok(Self {
            slot,
            cell: CellId(cell),
            step,
        })
    }
}

fn parse_number(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Decoded frame file name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameName {
    pub step: Step,
    pub tokens: Vec<SlotToken>,
}

impl FrameName {
    /// Parse a file stem (no directory, no extension).
    pub fn parse(stem: &str) -> Result<Self, FrameNameError> {
        let stem = stem.trim();
        if stem.is_empty() {
            return Err(FrameNameError::Empty);
        }

        let tokens = stem
            .split('_')
            .map(SlotToken::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let step = tokens[0].step;
        let mut slots = BTreeSet::new();
        let mut cells = BTreeSet::new();
        for t in &tokens {
            if t.step != step {
                return Err(FrameNameError::MixedSteps {
                    first: step.index(),
                    other: t.step.index(),
                });
            }
            if !slots.insert(t.slot) {
                return Err(FrameNameError::DuplicateSlot(t.slot));
            }
            if !cells.insert(t.cell) {
                return Err(FrameNameError::DuplicateCell(t.cell));
            }
        }

        Ok(Self { step, tokens })
    }

    /// Batch identity: the lowest cell id named in the frame.
    pub fn batch(&self) -> BatchId {
        let lowest = self.tokens.iter().map(|t| t.cell.0).min().unwrap_or(0);
        BatchId(lowest)
    }

    /// Slot -> cell binding declared by this name.
    pub fn binding(&self) -> BatchBinding {
        BatchBinding {
            batch: self.batch(),
            slots: self.tokens.iter().map(|t| (t.slot, t.cell)).collect(),
        }
    }
}

/// Slot -> cell binding of one batch, fixed by its step-0 frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchBinding {
    pub batch: BatchId,
    pub slots: BTreeMap<SlotId, CellId>,
}

impl BatchBinding {
    pub fn occupied(&self) -> BTreeSet<SlotId> {
        self.slots.keys().copied().collect()
    }

    pub fn cell(&self, slot: SlotId) -> Option<CellId> {
        self.slots.get(&slot).copied()
    }

    pub fn slot_of(&self, cell: CellId) -> Option<SlotId> {
        self.slots
            .iter()
            .find_map(|(&slot, &c)| (c == cell).then_some(slot))
    }
}
