use image::GrayImage;
use stack_align_core::{Detection, Step};

use crate::hough::{detect_circles, HoughParams};
use crate::preprocess::apply_profile;
use crate::profile::{PreprocessProfile, RadiusBand, StepProfile, StepProfiles};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors returned by the circle detector.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("no detection profile for step {0}")]
    NoProfile(Step),
    #[error("invalid radius band [{}, {}]", .0.min, .0.max)]
    InvalidBand(RadiusBand),
}

/// Step-aware circle detector: profile lookup, preprocessing, Hough transform.
#[derive(Clone, Debug, Default)]
pub struct CircleDetector {
    profiles: StepProfiles,
    hough: HoughParams,
}

impl CircleDetector {
    pub fn new(profiles: StepProfiles, hough: HoughParams) -> Self {
        Self { profiles, hough }
    }

    #[inline]
    pub fn profiles(&self) -> &StepProfiles {
        &self.profiles
    }

    #[inline]
    pub fn hough(&self) -> &HoughParams {
        &self.hough
    }

    pub fn profile(&self, step: Step) -> Result<&StepProfile, DetectError> {
        self.profiles.get(step).ok_or(DetectError::NoProfile(step))
    }

    /// Detect candidate circles in a full frame of `step`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, frame), fields(step = step.index(), width = frame.width(), height = frame.height()))
    )]
    pub fn detect(&self, frame: &GrayImage, step: Step) -> Result<Vec<Detection>, DetectError> {
        let profile = self.profile(step)?;
        self.detect_with(frame, profile.band, &profile.preprocess)
    }

    /// Detect with an explicit band and preprocessing, e.g. on a recovery crop.
    pub fn detect_with(
        &self,
        image: &GrayImage,
        band: RadiusBand,
        preprocess: &PreprocessProfile,
    ) -> Result<Vec<Detection>, DetectError> {
        if !band.is_valid() {
            return Err(DetectError::InvalidBand(band));
        }
        let prepared = apply_profile(image, preprocess);
        Ok(detect_circles(&prepared, band, &self.hough))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::draw_disks;

    #[test]
    fn unknown_step_is_an_error() {
        let detector = CircleDetector::default();
        let separator = Step::new(3).expect("step");
        let img = GrayImage::new(10, 10);
        assert_eq!(
            detector.detect(&img, separator),
            Err(DetectError::NoProfile(separator))
        );
    }

    #[test]
    fn uses_step_band() {
        let mut profiles = StepProfiles::default();
        let step = Step::new(2).expect("step");
        profiles.set(StepProfile {
            step,
            band: RadiusBand::new(35.0, 50.0),
            preprocess: PreprocessProfile::default(),
        });
        let detector = CircleDetector::new(profiles, HoughParams::default());

        let img = draw_disks(200, 200, &[(100.0, 95.0, 42.0)], 220, 20);
        let found = detector.detect(&img, step).expect("detect");
        assert_eq!(found.len(), 1);
        assert!((found[0].radius - 42.0).abs() <= 2.0);

        let cathode = Step::new(6).expect("step");
        assert!(detector.detect(&img, cathode).expect("detect").is_empty());
    }

    #[test]
    fn rejects_inverted_band() {
        let detector = CircleDetector::default();
        let img = GrayImage::new(10, 10);
        let band = RadiusBand::new(20.0, 10.0);
        assert_eq!(
            detector.detect_with(&img, band, &PreprocessProfile::default()),
            Err(DetectError::InvalidBand(band))
        );
    }
}
