//! Frame and recovery-crop discovery and decoding.

use std::fs;
use std::path::{Path, PathBuf};

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::circles::{parse_crop_name, RecoveryCrop};
use crate::core::{normalize_to_u8, CellId, FrameName, Step};
use crate::error::RunError;

const FRAME_EXTENSIONS: [&str; 3] = ["png", "tif", "tiff"];
const CROP_EXTENSIONS: [&str; 5] = ["png", "tif", "tiff", "jpg", "jpeg"];

/// A frame file whose name parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSource {
    pub path: PathBuf,
    pub name: FrameName,
}

/// A file that was not ingested, with the reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameListing {
    pub frames: Vec<FrameSource>,
    pub skipped: Vec<SkippedFile>,
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Image files in `dir` sorted by file name.
fn image_files(dir: &Path, allowed: &[&str]) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, allowed) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// List the frames of `dir`. Names that break the frame grammar are skipped
/// and reported, never fatal.
pub fn list_frames(dir: &Path) -> Result<FrameListing, RunError> {
    if !dir.is_dir() {
        return Err(RunError::MissingInput(dir.to_path_buf()));
    }

    let mut listing = FrameListing::default();
    for path in image_files(dir, &FRAME_EXTENSIONS)? {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match FrameName::parse(&stem) {
            Ok(name) => listing.frames.push(FrameSource { path, name }),
            Err(err) => {
                log::warn!("skipping {}: {err}", path.display());
                listing.skipped.push(SkippedFile {
                    file: display_name(&path),
                    reason: err.to_string(),
                });
            }
        }
    }

    log::info!(
        "{} frames in {} ({} skipped)",
        listing.frames.len(),
        dir.display(),
        listing.skipped.len()
    );
    Ok(listing)
}

/// Decode an image of any bit depth to 8-bit gray by divide-by-max scaling.
pub fn load_gray(path: &Path) -> Result<GrayImage, image::ImageError> {
    let raw = image::open(path)?.to_luma32f();
    let (w, h) = raw.dimensions();
    let pixels = normalize_to_u8(raw.as_raw());
    GrayImage::from_raw(w, h, pixels).ok_or_else(|| {
        image::ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        ))
    })
}

/// Load every recovery crop under `root/<step>/`.
///
/// Unreadable crops and files without a `c<cell>` stem are logged and
/// ignored. A missing `root` yields no crops.
pub fn load_crops(root: &Path) -> Result<Vec<RecoveryCrop>, RunError> {
    let mut crops = Vec::new();
    if !root.is_dir() {
        return Ok(crops);
    }

    let mut step_dirs: Vec<(Step, PathBuf)> = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let step = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(Step::new);
        match step {
            Some(step) => step_dirs.push((step, path)),
            None => log::warn!("ignoring crop directory {}", path.display()),
        }
    }
    step_dirs.sort();

    for (step, dir) in step_dirs {
        for path in image_files(&dir, &CROP_EXTENSIONS)? {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some((cell, origin)) = parse_crop_name(&stem) else {
                log::warn!("ignoring crop {} (expected c<cell>...)", path.display());
                continue;
            };
            match load_gray(&path) {
                Ok(image) => crops.push(RecoveryCrop {
                    cell,
                    step,
                    origin,
                    image,
                }),
                Err(err) => log::warn!("cannot read crop {}: {err}", path.display()),
            }
        }
    }
    log::debug!("{} recovery crops under {}", crops.len(), root.display());
    Ok(crops)
}

/// File name of a recovery crop: `c<cell>_x<ox>_y<oy>.png`.
pub fn crop_file_name(cell: CellId, x: u32, y: u32) -> String {
    format!("c{}_x{x}_y{y}.png", cell.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn lists_frames_and_reports_bad_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = GrayImage::new(4, 4);
        img.save(dir.path().join("p01c01s0_p02c02s0.png")).expect("save");
        img.save(dir.path().join("p01c01s2_p02c02s2.png")).expect("save");
        img.save(dir.path().join("overview.png")).expect("save");
        fs::write(dir.path().join("notes.txt"), "x").expect("write");

        let listing = list_frames(dir.path()).expect("list");
        assert_eq!(listing.frames.len(), 2);
        assert_eq!(listing.frames[0].name.step, Step::REFERENCE);
        assert_eq!(listing.skipped.len(), 1);
        assert_eq!(listing.skipped[0].file, "overview.png");
    }

    #[test]
    fn missing_input_dir_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = list_frames(&dir.path().join("nope")).expect_err("missing");
        assert!(matches!(err, RunError::MissingInput(_)));
    }

    #[test]
    fn sixteen_bit_frames_scale_by_their_maximum() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("p01c01s0.png");
        let raw: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(4, 1, |x, _| Luma([[0u16, 1000, 2000, 4000][x as usize]]));
        raw.save(&path).expect("save");

        let img = load_gray(&path).expect("load");
        let row: Vec<u8> = img.pixels().map(|p| p.0[0]).collect();
        assert_eq!(row[0], 0);
        assert_eq!(row[3], 255);
        assert!((row[2] as i32 - 127).abs() <= 1, "row = {row:?}");
    }

    #[test]
    fn crops_are_read_per_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        let step_dir = dir.path().join("2");
        fs::create_dir_all(&step_dir).expect("mkdir");
        GrayImage::new(8, 8)
            .save(step_dir.join(crop_file_name(CellId(5), 2000, 2500)))
            .expect("save");
        GrayImage::new(8, 8)
            .save(step_dir.join("readme.png"))
            .expect("save");

        let crops = load_crops(dir.path()).expect("crops");
        assert_eq!(crops.len(), 1);
        assert_eq!(crops[0].cell, CellId(5));
        assert_eq!(crops[0].step, Step::new(2).expect("step"));
        assert_eq!(crops[0].origin, nalgebra::Point2::new(2000.0, 2500.0));
        assert!(load_crops(&dir.path().join("absent")).expect("none").is_empty());
    }
}
