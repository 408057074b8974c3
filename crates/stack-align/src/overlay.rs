//! Diagnostic overlay: accepted circles and slot ROIs in red, downscaled.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::core::{BatchId, Detection, SlotId, SlotTable, Step};

const RED: Rgb<u8> = Rgb([255, 0, 0]);
/// Stroke width at full frame resolution.
const STROKE: i32 = 10;

pub fn overlay_path(dir: &Path, step: Step, batch: BatchId) -> PathBuf {
    dir.join(format!("centers_step{}_batch{}.jpg", step.index(), batch))
}

/// Draw the slot ROIs and the assigned circles (outline plus centre dot) on
/// `frame`, then resize to `width x height`. Rejected candidates are not drawn.
pub fn render_overlay(
    frame: &GrayImage,
    slots: &SlotTable,
    assigned: &BTreeMap<SlotId, Detection>,
    width: u32,
    height: u32,
) -> RgbImage {
    let mut canvas: RgbImage = image::DynamicImage::ImageLuma8(frame.clone()).to_rgb8();
    let half = STROKE / 2;

    for def in slots.iter() {
        for k in 0..STROKE {
            let x = def.roi.x_min.round() as i32 - half + k;
            let y = def.roi.y_min.round() as i32 - half + k;
            let w = def.roi.width().round() as i32 + 2 * (half - k);
            let h = def.roi.height().round() as i32 + 2 * (half - k);
            if w > 0 && h > 0 {
                draw_hollow_rect_mut(&mut canvas, Rect::at(x, y).of_size(w as u32, h as u32), RED);
            }
        }
    }

    for det in assigned.values() {
        let c = (det.center.x.round() as i32, det.center.y.round() as i32);
        let r = det.radius.round() as i32;
        for k in -half..=half {
            if r + k > 0 {
                draw_hollow_circle_mut(&mut canvas, c, r + k, RED);
            }
        }
        draw_filled_circle_mut(&mut canvas, c, half.max(1), RED);
    }

    if canvas.dimensions() == (width, height) || width == 0 || height == 0 {
        return canvas;
    }
    imageops::resize(&canvas, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Roi, SlotDef};

    #[test]
    fn overlay_is_resized_and_marks_circles() {
        let frame = GrayImage::new(600, 400);
        let slot = SlotId::new(1).expect("slot");
        let slots = SlotTable::new(vec![SlotDef {
            id: slot,
            label: "press 1".into(),
            roi: Roi::new(20.0, 20.0, 280.0, 180.0),
        }])
        .expect("table");
        let mut assigned = BTreeMap::new();
        assigned.insert(slot, Detection::new(150.0, 100.0, 50.0));

        let full = render_overlay(&frame, &slots, &assigned, 600, 400);
        assert_eq!(full.get_pixel(150, 100), &RED);
        assert_eq!(full.get_pixel(200, 100), &RED);
        assert_eq!(full.get_pixel(20, 100), &RED);
        assert_eq!(full.get_pixel(400, 300), &Rgb([0, 0, 0]));

        let small = render_overlay(&frame, &slots, &assigned, 300, 200);
        assert_eq!(small.dimensions(), (300, 200));
    }

    #[test]
    fn overlay_file_name() {
        let step = Step::new(6).expect("step");
        assert_eq!(
            overlay_path(Path::new("out"), step, BatchId(7)),
            PathBuf::from("out/centers_step6_batch7.jpg")
        );
    }
}
