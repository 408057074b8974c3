//! Step-specific preprocessing: contrast gain followed by a sized Gaussian blur.

use image::GrayImage;
use imageproc::filter::separable_filter_equal;

use crate::profile::PreprocessProfile;

/// Scale intensities by `gain`, rounding and saturating to `0..=255`.
pub fn contrast_gain(img: &GrayImage, gain: f32) -> GrayImage {
    let mut out = img.clone();
    if (gain - 1.0).abs() <= f32::EPSILON {
        return out;
    }
    for p in out.pixels_mut() {
        p.0[0] = (p.0[0] as f32 * gain).abs().round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Normalised 1D Gaussian kernel of odd length `size`.
///
/// Even sizes are bumped to the next odd size. A non-positive sigma is
/// derived from the size the same way common imaging libraries do:
/// `0.3 * ((size - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let size = if size % 2 == 0 { size + 1 } else { size };
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let half = (size / 2) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur with an explicit kernel size.
pub fn gaussian_blur(img: &GrayImage, kernel_size: usize, sigma: f32) -> GrayImage {
    if kernel_size <= 1 {
        return img.clone();
    }
    let kernel = gaussian_kernel(kernel_size, sigma);
    separable_filter_equal(img, &kernel)
}

/// Apply a step's preprocessing profile.
pub fn apply_profile(img: &GrayImage, profile: &PreprocessProfile) -> GrayImage {
    let boosted = contrast_gain(img, profile.contrast_gain);
    gaussian_blur(&boosted, profile.blur_kernel, profile.blur_sigma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    #[test]
    fn kernel_is_normalised_and_symmetric() {
        let k = gaussian_kernel(9, 2.0);
        assert_eq!(k.len(), 9);
        assert_relative_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        for i in 0..4 {
            assert_relative_eq!(k[i], k[8 - i], epsilon = 1e-7);
        }
        assert!(k[4] > k[3]);
        assert_eq!(gaussian_kernel(4, 1.0).len(), 5);
    }

    #[test]
    fn gain_saturates() {
        let img = GrayImage::from_raw(3, 1, vec![10, 100, 200]).expect("image");
        let out = contrast_gain(&img, 1.5);
        assert_eq!(out.as_raw(), &vec![15, 150, 255]);
    }

    #[test]
    fn blur_keeps_flat_image_flat() {
        let img = GrayImage::from_pixel(20, 20, Luma([80]));
        let out = apply_profile(&img, &PreprocessProfile::default());
        assert!(out.pixels().all(|p| (p.0[0] as i32 - 80).abs() <= 1));
    }
}
