//! High-level facade crate for the `stack-align-*` workspace.
//!
//! Measures how far the stacked parts of coin cells sit off-centre, from
//! one photograph per assembly step of six cells pressed together.
//!
//! This crate provides:
//! - re-exports of the core types, the circle detector and the metrology
//!   crates,
//! - the frame loader and the per-run [`pipeline`] (main pass, recovery,
//!   calibration, alignment),
//! - diagnostic overlays and the spreadsheet / JSON exporters,
//! - the JSON [`RunConfig`] and the `stack-align` command-line tool
//!   (feature `cli`).
//!
//! ## Quickstart
//!
//! ```no_run
//! use stack_align::{run, RunConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig {
//!     input_dir: "frames/2024-10-22".into(),
//!     ..RunConfig::default()
//! };
//! let summary = run(config)?;
//! println!("{} measurements at {:.4} mm/px", summary.measurements, summary.mm_per_px);
//! # Ok(())
//! # }
//! ```
//!
//! ## Outputs
//!
//! Relative to the output directory (the input directory by default):
//! - `detected_circles/centers_step<s>_batch<b>.jpg`: overlays,
//! - `not_detected/<s>/c<cell>_x<ox>_y<oy>.png`: crops of missed slots,
//! - `data/data.xlsx`, `data/measurements.json`, `data/diagnostics.json`,
//! - `json/alignment.json`, `json/alignment_steps.json`.

pub use stack_align_circles as circles;
pub use stack_align_core as core;
pub use stack_align_metrology as metrology;

pub mod config;
pub mod export;
pub mod loader;
pub mod overlay;
pub mod pipeline;

mod error;

pub use config::{ConfigError, OutputLayout, OverlayParams, RunConfig};
pub use error::RunError;
pub use export::ExportError;
pub use pipeline::{rerun_recovery, run, Alignments, Diagnostics, Pipeline, Run, RunSummary};

pub use stack_align_core::{CellId, Measurement, MeasurementStore, SlotId, Step};
pub use stack_align_metrology::{AlignmentRecord, CalibrationFactor, NamedPair};
