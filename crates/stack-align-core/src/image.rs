/// Normalise raw samples of any bit depth to 8 bits: divide by the frame
/// maximum, scale to 255 and truncate.
///
/// A frame whose maximum is not positive (all black, or empty) maps to zeros.
pub fn normalize_to_u8(samples: &[f32]) -> Vec<u8> {
    let max = samples
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max);
    if max <= 0.0 {
        return vec![0; samples.len()];
    }
    samples
        .iter()
        .map(|&v| {
            if v.is_finite() {
                (v / max * 255.0).clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect()
}
