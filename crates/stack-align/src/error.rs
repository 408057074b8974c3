use std::path::PathBuf;

use crate::circles::DetectError;
use crate::config::ConfigError;
use crate::export::ExportError;
use crate::metrology::CalibrationError;

/// Fatal errors of a measurement run. Per-frame problems (bad names,
/// undecodable files, empty detections) are recorded in the diagnostics
/// instead.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("input directory {} does not exist", .0.display())]
    MissingInput(PathBuf),
    #[error("no frames found in {}", .0.display())]
    NoFrames(PathBuf),
    #[error("calibration was already computed for this run")]
    AlreadyCalibrated,
    #[error("millimetre conversion requested before calibration")]
    NotCalibrated,
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cannot start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
