//! Synthetic frames for detector and recovery tests.

use image::{GrayImage, Luma};

/// Render bright disks `(cx, cy, radius)` on a dark background.
pub(crate) fn draw_disks(w: u32, h: u32, disks: &[(f32, f32, f32)], fg: u8, bg: u8) -> GrayImage {
    let mut img = GrayImage::from_pixel(w, h, Luma([bg]));
    for (x, y, p) in img.enumerate_pixels_mut() {
        let inside = disks.iter().any(|&(cx, cy, r)| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            dx * dx + dy * dy <= r * r
        });
        if inside {
            *p = Luma([fg]);
        }
    }
    img
}
