//! One measurement run: main pass, recovery, calibration, alignment, export.
//!
//! The main pass decodes and measures frames on the rayon pool. Each worker
//! owns its frame and returns a small [`FrameOutcome`]; pixel buffers are
//! dropped before aggregation. Aggregation is sequential and inserts exactly
//! one measurement per occupied (cell, step): the assigned detection, or a
//! sentinel.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use image::imageops;
use image::GrayImage;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::circles::{
    assign_to_slots, recover_missing, CircleDetector, RecoveryCrop, RecoveryParams,
    RecoveryReport, RejectedCandidate, SlotAssignment,
};
use crate::config::{OutputLayout, RunConfig};
use crate::core::{
    BatchBinding, BatchId, CellId, CellStep, Measurement, MeasurementStore, SlotId, SlotTable, Step,
    StoreError,
};
use crate::error::RunError;
use crate::export::{read_json, write_alignment_json, write_json, write_workbook};
use crate::loader::{crop_file_name, list_frames, load_crops, load_gray, FrameSource, SkippedFile};
use crate::metrology::{
    calibrate, AlignmentCalculator, AlignmentRecord, CalibrationFactor, CalibrationStrategy,
    NamedPair, PairAlignment, ThicknessTable,
};
use crate::overlay::{overlay_path, render_overlay};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Per-frame diagnostic record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub file: String,
    pub batch: BatchId,
    pub step: Step,
    pub candidates: usize,
    pub assigned: Vec<SlotId>,
    pub unfilled: Vec<SlotId>,
    pub rejected: Vec<RejectedCandidate>,
    /// Set when the file could not be decoded; all its slots are sentinels.
    pub error: Option<String>,
}

/// A later frame whose slot -> cell binding disagrees with step 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConflict {
    pub file: String,
    pub batch: BatchId,
    pub expected: BTreeMap<SlotId, CellId>,
    pub found: BTreeMap<SlotId, CellId>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnostics {
    pub skipped: Vec<SkippedFile>,
    pub frames: Vec<FrameReport>,
    pub binding_conflicts: Vec<BindingConflict>,
    /// (cell, step) pairs named by more than one frame; the first frame wins.
    pub duplicates: Vec<CellStep>,
    pub recovery: Option<RecoveryReport>,
}

impl Diagnostics {
    /// Occupied slots left without a detection by the main pass.
    pub fn unassigned_slots(&self) -> usize {
        self.frames.iter().map(|f| f.unfilled.len()).sum()
    }

    pub fn rejected_candidates(&self) -> usize {
        self.frames.iter().map(|f| f.rejected.len()).sum()
    }
}

/// Alignment results of a calibrated run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alignments {
    pub pairs: Vec<PairAlignment>,
    /// Every step of every cell against the cell's step 0.
    pub steps: Vec<AlignmentRecord>,
}

/// Counts printed at the end of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub frames: usize,
    pub measurements: usize,
    pub sentinels: usize,
    pub recovered: usize,
    pub rejected_candidates: usize,
    pub mm_per_px: f64,
}

/// State of one run. The calibration factor is set at most once.
#[derive(Clone, Debug, Default)]
pub struct Run {
    store: MeasurementStore,
    bindings: BTreeMap<BatchId, BatchBinding>,
    diagnostics: Diagnostics,
    calibration: Option<CalibrationFactor>,
}

impl Run {
    /// Resume from previously exported measurements.
    pub fn from_store(store: MeasurementStore, diagnostics: Diagnostics) -> Self {
        Self {
            store,
            diagnostics,
            ..Self::default()
        }
    }

    pub fn store(&self) -> &MeasurementStore {
        &self.store
    }

    pub fn bindings(&self) -> &BTreeMap<BatchId, BatchBinding> {
        &self.bindings
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn calibration(&self) -> Option<CalibrationFactor> {
        self.calibration
    }

    /// Re-detect sentinels on `crops`; the report is kept in the diagnostics.
    pub fn recover(
        &mut self,
        crops: Vec<RecoveryCrop>,
        detector: &CircleDetector,
        params: &RecoveryParams,
    ) -> &RecoveryReport {
        let report = recover_missing(&mut self.store, crops, detector, params);
        log::info!(
            "recovery: {} recovered, {} still missing",
            report.recovered.len(),
            report.still_missing.len()
        );
        self.diagnostics.recovery.insert(report)
    }

    pub fn calibrate(&mut self, strategy: &CalibrationStrategy) -> Result<CalibrationFactor, RunError> {
        if self.calibration.is_some() {
            return Err(RunError::AlreadyCalibrated);
        }
        let factor = calibrate(&self.store, strategy)?;
        self.calibration = Some(factor);
        Ok(factor)
    }

    pub fn factor(&self) -> Result<CalibrationFactor, RunError> {
        self.calibration.ok_or(RunError::NotCalibrated)
    }

    pub fn alignments(
        &self,
        thickness: &ThicknessTable,
        pairs: &[NamedPair],
    ) -> Result<Alignments, RunError> {
        let calc = AlignmentCalculator::new(self.factor()?, thickness);
        Ok(Alignments {
            pairs: calc.align_pairs(&self.store, pairs),
            steps: calc.align_to_reference(&self.store),
        })
    }

    fn absorb(&mut self, outcome: FrameOutcome) {
        let FrameOutcome {
            file,
            batch,
            step,
            binding,
            result,
        } = outcome;

        let (assignment, candidates, error) = match result {
            FrameResult::Unprofiled(reason) => {
                self.diagnostics.skipped.push(SkippedFile { file, reason });
                return;
            }
            FrameResult::Unreadable(reason) => (SlotAssignment::default(), 0, Some(reason)),
            FrameResult::Measured {
                assignment,
                candidates,
            } => (assignment, candidates, None),
        };

        for (&slot, &cell) in &binding.slots {
            let m = match assignment.assigned.get(&slot) {
                Some(det) => Measurement::detected(batch, slot, cell, step, det),
                None => Measurement::sentinel(batch, slot, cell, step),
            };
            if let Err(StoreError::Duplicate(key)) = self.store.insert(m) {
                log::warn!("{file}: {} {} already measured, keeping the first", key.cell, key.step);
                self.diagnostics.duplicates.push(key);
            }
        }

        let occupied = binding.occupied();
        self.diagnostics.frames.push(FrameReport {
            file,
            batch,
            step,
            candidates,
            assigned: assignment.assigned.keys().copied().collect(),
            unfilled: assignment.unfilled(&occupied),
            rejected: assignment.rejected,
            error,
        });
    }
}

enum FrameResult {
    Measured {
        assignment: SlotAssignment,
        candidates: usize,
    },
    Unreadable(String),
    Unprofiled(String),
}

/// What a worker hands back for one frame.
struct FrameOutcome {
    file: String,
    batch: BatchId,
    step: Step,
    binding: BatchBinding,
    result: FrameResult,
}

/// Fix each batch's slot -> cell binding from its step-0 frame.
///
/// A batch without a step-0 frame takes the binding of its first frame.
fn resolve_bindings(
    frames: &[FrameSource],
) -> (BTreeMap<BatchId, BatchBinding>, Vec<BindingConflict>) {
    let mut bindings: BTreeMap<BatchId, BatchBinding> = BTreeMap::new();
    let mut conflicts = Vec::new();

    let (reference, later): (Vec<&FrameSource>, Vec<&FrameSource>) =
        frames.iter().partition(|f| f.name.step.is_reference());

    for src in reference.into_iter().chain(later) {
        let found = src.name.binding();
        let is_reference = src.name.step.is_reference();
        match bindings.get(&found.batch) {
            None => {
                if !is_reference {
                    log::warn!(
                        "batch {} has no step-0 frame; binding taken from {}",
                        found.batch,
                        src.path.display()
                    );
                }
                bindings.insert(found.batch, found);
            }
            Some(expected) if expected.slots != found.slots => {
                log::warn!(
                    "{}: slot binding differs from batch {} step 0, ignored",
                    src.path.display(),
                    found.batch
                );
                conflicts.push(BindingConflict {
                    file: file_name(&src.path),
                    batch: found.batch,
                    expected: expected.slots.clone(),
                    found: found.slots,
                });
            }
            Some(_) => {}
        }
    }
    (bindings, conflicts)
}

/// `true` for the first frame of each (batch, step) in listing order, the
/// frame whose measurements are kept. Later frames would overwrite its
/// overlay.
fn overlay_owners(frames: &[FrameSource]) -> Vec<bool> {
    let mut seen = BTreeSet::new();
    frames
        .iter()
        .map(|src| {
            let first = seen.insert((src.name.batch(), src.name.step));
            if !first {
                log::warn!(
                    "{}: batch {} step {} already has a frame, overlay not written",
                    src.path.display(),
                    src.name.batch(),
                    src.name.step
                );
            }
            first
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Clip `roi` to the frame and cut it out, returning the crop origin too.
fn crop_slot(frame: &GrayImage, slots: &SlotTable, slot: SlotId) -> Option<(u32, u32, GrayImage)> {
    let roi = slots.get(slot)?.roi;
    let (w, h) = frame.dimensions();
    let x0 = (roi.x_min.max(0.0).floor() as u32).min(w);
    let y0 = (roi.y_min.max(0.0).floor() as u32).min(h);
    let x1 = ((roi.x_max.max(0.0).ceil() as u32) + 1).min(w);
    let y1 = ((roi.y_max.max(0.0).ceil() as u32) + 1).min(h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let crop = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    Some((x0, y0, crop))
}

/// Detector, slot table and output layout of one configuration.
pub struct Pipeline {
    config: RunConfig,
    detector: CircleDetector,
    layout: OutputLayout,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Self {
        let detector = CircleDetector::new(config.profiles.clone(), config.hough);
        let layout = config.layout();
        Self {
            config,
            detector,
            layout,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn detector(&self) -> &CircleDetector {
        &self.detector
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Detect, assign and aggregate every frame of the input directory.
    pub fn main_pass(&self) -> Result<Run, RunError> {
        let input = &self.config.input_dir;
        let listing = list_frames(input)?;
        if listing.frames.is_empty() {
            return Err(RunError::NoFrames(input.clone()));
        }
        if self.config.overlay.enabled {
            fs::create_dir_all(self.layout.overlay_dir())?;
        }

        let (bindings, conflicts) = resolve_bindings(&listing.frames);
        let owners = overlay_owners(&listing.frames);
        let process = |(src, &overlay): (&FrameSource, &bool)| {
            self.process_frame(src, &bindings, overlay)
        };
        let outcomes: Vec<Result<FrameOutcome, RunError>> = if self.config.parallel {
            let frames = &listing.frames;
            let pass = || -> Vec<Result<FrameOutcome, RunError>> {
                frames.par_iter().zip(owners.par_iter()).map(process).collect()
            };
            match self.config.threads {
                Some(n) => ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("frame-{i}"))
                    .build()?
                    .install(pass),
                None => pass(),
            }
        } else {
            listing.frames.iter().zip(owners.iter()).map(process).collect()
        };

        let mut run = Run {
            bindings,
            diagnostics: Diagnostics {
                skipped: listing.skipped,
                binding_conflicts: conflicts,
                ..Diagnostics::default()
            },
            ..Run::default()
        };
        for outcome in outcomes {
            run.absorb(outcome?);
        }

        log::info!(
            "main pass: {} measurements, {} sentinels, {} rejected candidates",
            run.store.len(),
            run.store.sentinels().count(),
            run.diagnostics.rejected_candidates()
        );
        Ok(run)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(file = %src.path.display()))
    )]
    fn process_frame(
        &self,
        src: &FrameSource,
        bindings: &BTreeMap<BatchId, BatchBinding>,
        owns_overlay: bool,
    ) -> Result<FrameOutcome, RunError> {
        let step = src.name.step;
        let batch = src.name.batch();
        let binding = bindings
            .get(&batch)
            .cloned()
            .unwrap_or_else(|| src.name.binding());
        let mut outcome = FrameOutcome {
            file: file_name(&src.path),
            batch,
            step,
            binding,
            result: FrameResult::Unprofiled(String::new()),
        };

        let band = match self.detector.profile(step) {
            Ok(profile) => profile.band,
            Err(err) => {
                log::warn!("skipping {}: {err}", src.path.display());
                outcome.result = FrameResult::Unprofiled(err.to_string());
                return Ok(outcome);
            }
        };

        let frame = match load_gray(&src.path) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("cannot decode {}: {err}", src.path.display());
                outcome.result = FrameResult::Unreadable(err.to_string());
                return Ok(outcome);
            }
        };

        let candidates = self.detector.detect(&frame, step)?;
        let occupied: BTreeSet<SlotId> = outcome.binding.occupied();
        let assignment = assign_to_slots(&candidates, &self.config.slots, &occupied, band);
        log::debug!(
            "{}: {} candidates, {}/{} slots filled",
            outcome.file,
            candidates.len(),
            assignment.assigned.len(),
            occupied.len()
        );

        if self.config.overlay.enabled && owns_overlay {
            let overlay = render_overlay(
                &frame,
                &self.config.slots,
                &assignment.assigned,
                self.config.overlay.width,
                self.config.overlay.height,
            );
            overlay.save(overlay_path(&self.layout.overlay_dir(), step, batch))?;
        }

        if self.config.save_missing_crops {
            self.save_missing_crops(&frame, &outcome.binding, step, &assignment.unfilled(&occupied))?;
        }

        outcome.result = FrameResult::Measured {
            assignment,
            candidates: candidates.len(),
        };
        Ok(outcome)
    }

    fn save_missing_crops(
        &self,
        frame: &GrayImage,
        binding: &BatchBinding,
        step: Step,
        unfilled: &[SlotId],
    ) -> Result<(), RunError> {
        if unfilled.is_empty() {
            return Ok(());
        }
        let dir = self.layout.missing_dir().join(step.index().to_string());
        fs::create_dir_all(&dir)?;
        for &slot in unfilled {
            let (Some(cell), Some((x, y, crop))) =
                (binding.cell(slot), crop_slot(frame, &self.config.slots, slot))
            else {
                continue;
            };
            let path = dir.join(crop_file_name(cell, x, y));
            crop.save(&path)?;
            log::debug!("saved recovery crop {}", path.display());
        }
        Ok(())
    }

    /// Load saved crops and re-detect the run's sentinels.
    pub fn recover(&self, run: &mut Run) -> Result<usize, RunError> {
        if run.store.sentinels().next().is_none() {
            log::info!("no sentinels, recovery skipped");
            return Ok(0);
        }
        let crops = load_crops(&self.layout.missing_dir())?;
        let report = run.recover(crops, &self.detector, &self.config.recovery);
        Ok(report.recovered.len())
    }

    /// Persist the run state, then calibrate, align and write the
    /// millimetre outputs.
    ///
    /// `measurements.json` and `diagnostics.json` hold pixel data only and
    /// are written before calibration, so a run without a usable step-0
    /// reference can still be resumed with [`rerun_recovery`].
    pub fn finish(&self, run: &mut Run) -> Result<RunSummary, RunError> {
        self.write_state(run)?;
        let factor = match run.calibrate(&self.config.calibration) {
            Ok(factor) => factor,
            Err(err) => {
                log::error!(
                    "{err}; {} unassigned slots, {} rejected candidates, state kept in {}",
                    run.diagnostics.unassigned_slots(),
                    run.diagnostics.rejected_candidates(),
                    self.layout.data_dir().display()
                );
                return Err(err);
            }
        };
        let thickness = self.config.thickness.table();
        let alignments = run.alignments(&thickness, &self.config.pairs)?;
        self.export(run, &alignments)?;

        Ok(RunSummary {
            frames: run.diagnostics.frames.len(),
            measurements: run.store.len(),
            sentinels: run.store.sentinels().count(),
            recovered: run
                .diagnostics
                .recovery
                .as_ref()
                .map_or(0, |r| r.recovered.len()),
            rejected_candidates: run.diagnostics.rejected_candidates(),
            mm_per_px: factor.mm_per_px,
        })
    }

    fn write_state(&self, run: &Run) -> Result<(), RunError> {
        write_json(&self.layout.measurements(), &run.store)?;
        write_json(&self.layout.diagnostics(), &run.diagnostics)?;
        Ok(())
    }

    fn export(&self, run: &Run, alignments: &Alignments) -> Result<(), RunError> {
        let layout = &self.layout;
        write_workbook(
            &layout.workbook(),
            &run.store,
            run.calibration,
            &alignments.pairs,
        )?;
        write_alignment_json(&layout.alignment_json(), &alignments.pairs)?;
        write_json(&layout.step_alignment_json(), &alignments.steps)?;
        log::info!("outputs written under {}", layout.root().display());
        Ok(())
    }
}

/// Main pass, recovery, calibration, alignment and export.
pub fn run(config: RunConfig) -> Result<RunSummary, RunError> {
    let pipeline = Pipeline::new(config);
    let mut run = pipeline.main_pass()?;
    pipeline.recover(&mut run)?;
    pipeline.finish(&mut run)
}

/// Reload the exported measurements, recover from the crops on disk and
/// re-export. Used after crops were prepared by hand.
pub fn rerun_recovery(config: RunConfig) -> Result<RunSummary, RunError> {
    let pipeline = Pipeline::new(config);
    let layout = pipeline.layout();
    let store: MeasurementStore = read_json(&layout.measurements())?;
    let diagnostics: Diagnostics = read_json(&layout.diagnostics()).unwrap_or_else(|err| {
        log::warn!("previous diagnostics unavailable: {err}");
        Diagnostics::default()
    });
    let mut run = Run::from_store(store, diagnostics);
    pipeline.recover(&mut run)?;
    pipeline.finish(&mut run)
}
