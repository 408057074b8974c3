//! JSON run configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::circles::{HoughParams, RecoveryParams, StepProfiles};
use crate::core::SlotTable;
use crate::metrology::{CalibrationStrategy, NamedPair, ThicknessSource};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Diagnostic overlay settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayParams {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for OverlayParams {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 1200,
            height: 800,
        }
    }
}

/// Everything one measurement run needs. Every field has a default, so a
/// config file only lists what it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Directory holding the frame images.
    pub input_dir: PathBuf,
    /// Root of all outputs; the input directory when unset.
    pub output_dir: Option<PathBuf>,
    /// Per-step radius band and preprocessing. A list here replaces the
    /// whole default table.
    pub profiles: StepProfiles,
    pub slots: SlotTable,
    pub hough: HoughParams,
    pub recovery: RecoveryParams,
    pub calibration: CalibrationStrategy,
    pub thickness: ThicknessSource,
    pub pairs: Vec<NamedPair>,
    pub overlay: OverlayParams,
    /// Save the slot crop of every sentinel for later recovery.
    pub save_missing_crops: bool,
    /// Process frames on the rayon pool.
    pub parallel: bool,
    /// Worker threads for the parallel pass; all cores when unset. Each
    /// worker holds one decoded frame plus a `u32` vote accumulator and two
    /// gradient planes of the same size (about 8 bytes per pixel, roughly
    /// 200 MB for a 24 MP frame), so large frames may need a lower count.
    pub threads: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: None,
            profiles: StepProfiles::default(),
            slots: SlotTable::default(),
            hough: HoughParams::default(),
            recovery: RecoveryParams::default(),
            calibration: CalibrationStrategy::default(),
            thickness: ThicknessSource::default(),
            pairs: NamedPair::defaults(),
            overlay: OverlayParams::default(),
            save_missing_crops: true,
            parallel: true,
            threads: None,
        }
    }
}

impl RunConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn output_root(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.input_dir)
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(self.output_root())
    }
}

/// Where a run writes its files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn overlay_dir(&self) -> PathBuf {
        self.root.join("detected_circles")
    }

    /// Recovery crops; one sub-directory per step index.
    pub fn missing_dir(&self) -> PathBuf {
        self.root.join("not_detected")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn workbook(&self) -> PathBuf {
        self.data_dir().join("data.xlsx")
    }

    pub fn measurements(&self) -> PathBuf {
        self.data_dir().join("measurements.json")
    }

    pub fn diagnostics(&self) -> PathBuf {
        self.data_dir().join("diagnostics.json")
    }

    pub fn json_dir(&self) -> PathBuf {
        self.root.join("json")
    }

    pub fn alignment_json(&self) -> PathBuf {
        self.json_dir().join("alignment.json")
    }

    pub fn step_alignment_json(&self) -> PathBuf {
        self.json_dir().join("alignment_steps.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let json = r#"{
            "input_dir": "frames",
            "calibration": {"kind": "reference_diameter", "diameter_mm": 19.5},
            "overlay": {"enabled": false},
            "threads": 2
        }"#;
        let cfg: RunConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(cfg.input_dir, PathBuf::from("frames"));
        assert_eq!(cfg.output_root(), Path::new("frames"));
        assert!(!cfg.overlay.enabled);
        assert_eq!(cfg.overlay.width, 1200);
        assert_eq!(cfg.threads, Some(2));
        assert!(cfg.parallel);
        assert_eq!(cfg.pairs.len(), 3);
        assert_eq!(cfg.slots, SlotTable::default());
        assert_eq!(
            cfg.calibration,
            CalibrationStrategy::ReferenceDiameter { diameter_mm: 19.5 }
        );
    }

    #[test]
    fn default_config_survives_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.json");
        let cfg = RunConfig::default();
        cfg.write_json(&path).expect("write");
        assert_eq!(RunConfig::load_json(&path).expect("load"), cfg);
    }

    #[test]
    fn layout_matches_output_tree() {
        let layout = OutputLayout::new("/data/run");
        assert_eq!(layout.workbook(), PathBuf::from("/data/run/data/data.xlsx"));
        assert_eq!(
            layout.alignment_json(),
            PathBuf::from("/data/run/json/alignment.json")
        );
    }
}
