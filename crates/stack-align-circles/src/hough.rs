//! Radius-bounded Hough-gradient circle transform.
//!
//! Every Canny edge pixel votes along its Sobel gradient direction (both
//! signs) at each integer radius in the band. Accumulator peaks above the
//! vote threshold become centre candidates, strongest first; a candidate
//! closer than `min_center_distance` to an accepted centre is dropped. The
//! radius of each surviving centre is the best-supported edge distance in
//! the band, where support is normalised by radius so small circles are not
//! swamped by the longer perimeter of large ones.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use stack_align_core::Detection;

use crate::profile::RadiusBand;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Fixed accumulator parameters of the transform.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughParams {
    /// Minimum distance between accepted centres (pixels).
    pub min_center_distance: f32,
    /// Upper Canny threshold; the lower hysteresis threshold is half of it.
    pub edge_threshold: f32,
    /// Minimum centre votes. Also the minimum number of edge pixels that
    /// must support the chosen radius.
    pub accumulator_threshold: u32,
    /// Optional cap on the number of returned circles (strongest first).
    pub max_candidates: Option<usize>,
}

impl Default for HoughParams {
    fn default() -> Self {
        Self {
            min_center_distance: 100.0,
            edge_threshold: 30.0,
            accumulator_threshold: 50,
            max_candidates: None,
        }
    }
}

/// Detect circles whose radius lies in `band`.
///
/// The image is expected to be preprocessed already. Results are ordered by
/// centre votes (highest first); an empty result is not an error.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, params), fields(width = img.width(), height = img.height()))
)]
pub fn detect_circles(img: &GrayImage, band: RadiusBand, params: &HoughParams) -> Vec<Detection> {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 || !band.is_valid() {
        return Vec::new();
    }
    let r_min = band.min.ceil().max(1.0) as i32;
    let r_max = band.max.floor() as i32;
    if r_max < r_min {
        return Vec::new();
    }

    let edges = canny(img, 0.5 * params.edge_threshold, params.edge_threshold);
    let gx = horizontal_sobel(img);
    let gy = vertical_sobel(img);

    let stride = w as usize;
    let mut accum = vec![0u32; stride * h as usize];
    let mut edge_points = Vec::new();

    for (x, y, e) in edges.enumerate_pixels() {
        if e.0[0] == 0 {
            continue;
        }
        let gxv = gx.get_pixel(x, y).0[0] as f32;
        let gyv = gy.get_pixel(x, y).0[0] as f32;
        let mag = (gxv * gxv + gyv * gyv).sqrt();
        if mag <= f32::EPSILON {
            continue;
        }
        let (ux, uy) = (gxv / mag, gyv / mag);
        let (xf, yf) = (x as f32, y as f32);
        edge_points.push(Point2::new(xf, yf));

        for r in r_min..=r_max {
            let r = r as f32;
            for sign in [1.0f32, -1.0] {
                let vx = (xf + sign * ux * r).round();
                let vy = (yf + sign * uy * r).round();
                if vx < 0.0 || vy < 0.0 || vx >= w as f32 || vy >= h as f32 {
                    continue;
                }
                accum[vy as usize * stride + vx as usize] += 1;
            }
        }
    }

    if edge_points.is_empty() {
        return Vec::new();
    }

    let mut peaks = find_peaks(&accum, stride, h as usize, params.accumulator_threshold);
    peaks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let min_dist_sq = params.min_center_distance * params.min_center_distance;
    let mut out: Vec<Detection> = Vec::new();
    for (idx, votes) in peaks {
        let center = Point2::new((idx % stride) as f32, (idx / stride) as f32);
        let too_close = out
            .iter()
            .any(|d| (d.center - center).norm_squared() < min_dist_sq);
        if too_close {
            continue;
        }
        let Some(radius) = estimate_radius(
            center,
            &edge_points,
            r_min,
            r_max,
            params.accumulator_threshold,
        ) else {
            continue;
        };
        out.push(Detection {
            center,
            radius: radius.clamp(band.min, band.max),
            votes,
        });
        if params.max_candidates.is_some_and(|cap| out.len() >= cap) {
            break;
        }
    }

    log::debug!(
        "hough: {} edge px, {} circles in r=[{}, {}]",
        edge_points.len(),
        out.len(),
        band.min,
        band.max
    );
    out
}

/// Local accumulator maxima strictly above `threshold`, as `(index, votes)`.
///
/// Ties between horizontally/vertically adjacent cells resolve to the
/// top-left one.
fn find_peaks(accum: &[u32], stride: usize, height: usize, threshold: u32) -> Vec<(usize, u32)> {
    let mut peaks = Vec::new();
    if stride < 3 || height < 3 {
        return peaks;
    }
    for y in 1..height - 1 {
        for x in 1..stride - 1 {
            let idx = y * stride + x;
            let v = accum[idx];
            if v > threshold
                && v > accum[idx - 1]
                && v >= accum[idx + 1]
                && v > accum[idx - stride]
                && v >= accum[idx + stride]
            {
                peaks.push((idx, v));
            }
        }
    }
    peaks
}

/// Best-supported radius around `center`, refined to sub-pixel precision by
/// averaging the edge distances of the winning bin and its neighbours.
fn estimate_radius(
    center: Point2<f32>,
    edge_points: &[Point2<f32>],
    r_min: i32,
    r_max: i32,
    min_support: u32,
) -> Option<f32> {
    let bins = (r_max - r_min + 1) as usize;
    let mut counts = vec![0u32; bins];
    let mut sums = vec![0.0f32; bins];
    let reach = r_max as f32 + 0.5;

    for p in edge_points {
        let dx = p.x - center.x;
        let dy = p.y - center.y;
        if dx.abs() > reach || dy.abs() > reach {
            continue;
        }
        let d = (dx * dx + dy * dy).sqrt();
        let bin = d.round() as i32;
        if bin < r_min || bin > r_max {
            continue;
        }
        let k = (bin - r_min) as usize;
        counts[k] += 1;
        sums[k] += d;
    }

    let mut best: Option<(usize, f32)> = None;
    for (k, &c) in counts.iter().enumerate() {
        if c == 0 {
            continue;
        }
        let score = c as f32 / (r_min + k as i32) as f32;
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((k, score));
        }
    }
    let (k, _) = best?;
    if counts[k] < min_support {
        return None;
    }

    let lo = k.saturating_sub(1);
    let hi = (k + 1).min(bins - 1);
    let n: u32 = counts[lo..=hi].iter().sum();
    let s: f32 = sums[lo..=hi].iter().sum();
    Some(s / n as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::apply_profile;
    use crate::profile::PreprocessProfile;
    use crate::test_utils::draw_disks;
    use image::Luma;

    fn prepared(w: u32, h: u32, disks: &[(f32, f32, f32)]) -> GrayImage {
        let raw = draw_disks(w, h, disks, 200, 30);
        apply_profile(&raw, &PreprocessProfile::default())
    }

    #[test]
    fn finds_single_disk_center_and_radius() {
        let img = prepared(320, 300, &[(150.0, 140.0, 60.0)]);
        let found = detect_circles(&img, RadiusBand::new(50.0, 70.0), &HoughParams::default());
        assert_eq!(found.len(), 1, "found {found:?}");
        let c = found[0];
        assert!((c.center.x - 150.0).abs() <= 2.0, "x = {}", c.center.x);
        assert!((c.center.y - 140.0).abs() <= 2.0, "y = {}", c.center.y);
        assert!((c.radius - 60.0).abs() <= 2.0, "r = {}", c.radius);
        assert!(c.votes > 50);
    }

    #[test]
    fn finds_two_separated_disks() {
        let img = prepared(480, 220, &[(110.0, 110.0, 55.0), (350.0, 105.0, 60.0)]);
        let mut found = detect_circles(&img, RadiusBand::new(45.0, 70.0), &HoughParams::default());
        assert_eq!(found.len(), 2, "found {found:?}");
        found.sort_by(|a, b| a.center.x.total_cmp(&b.center.x));
        assert!((found[0].center.x - 110.0).abs() <= 2.0);
        assert!((found[1].center.x - 350.0).abs() <= 2.0);
        assert!((found[0].radius - 55.0).abs() <= 2.0);
        assert!((found[1].radius - 60.0).abs() <= 2.0);
    }

    #[test]
    fn disk_outside_radius_band_is_ignored() {
        let img = prepared(320, 300, &[(150.0, 140.0, 60.0)]);
        let found = detect_circles(&img, RadiusBand::new(90.0, 110.0), &HoughParams::default());
        assert!(found.is_empty(), "found {found:?}");
    }

    #[test]
    fn flat_image_yields_nothing() {
        let img = GrayImage::from_pixel(100, 100, Luma([90]));
        let found = detect_circles(&img, RadiusBand::new(10.0, 40.0), &HoughParams::default());
        assert!(found.is_empty());
    }

    #[test]
    fn candidate_cap_keeps_strongest() {
        let img = prepared(480, 220, &[(110.0, 110.0, 55.0), (350.0, 105.0, 60.0)]);
        let params = HoughParams {
            max_candidates: Some(1),
            ..HoughParams::default()
        };
        let found = detect_circles(&img, RadiusBand::new(45.0, 70.0), &params);
        assert_eq!(found.len(), 1);
    }
}
