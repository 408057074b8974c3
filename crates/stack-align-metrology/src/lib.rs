//! Millimetre-scale measurements from pixel detections.
//!
//! - [`calibrate`] derives one mm-per-pixel factor per run from the step-0
//!   pressing tool (known diameter or known slot spacing).
//! - [`ThicknessTable`] removes the apparent shift caused by stack height.
//! - [`AlignmentCalculator`] turns two corrected centres into `(dx, dy, dz)`
//!   in mm; a sentinel on either side gives an undefined record, never zero.

pub mod alignment;
pub mod calibration;
pub mod thickness;

pub use alignment::{
    AlignmentCalculator, AlignmentOffset, AlignmentRecord, NamedPair, PairAlignment,
};
pub use calibration::{calibrate, CalibrationError, CalibrationFactor, CalibrationStrategy};
pub use thickness::{
    DriftModel, SlotDrift, StepHeight, ThicknessEntry, ThicknessSource, ThicknessTable,
};
