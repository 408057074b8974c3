//! Core types for stacked-part alignment measurement.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any image decoder or circle detector; it only knows about
//! assembly steps, press slots, frame names and the per-(cell, step)
//! measurement store that every later stage reads from.

mod frame_name;
mod ids;
mod image;
mod logger;
mod measurement;
mod slot;

pub use frame_name::{BatchBinding, FrameName, FrameNameError, SlotToken};
pub use ids::{BatchId, CellId, SlotId, Step};
pub use image::normalize_to_u8;
pub use measurement::{CellStep, Detection, Measurement, MeasurementStore, StoreError};
pub use slot::{Roi, SlotDef, SlotTable, SlotTableError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
