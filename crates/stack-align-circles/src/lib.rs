//! Circle detection and press-slot assignment for stacked-part images.
//!
//! Pipeline per frame:
//! - apply the step's preprocessing profile (contrast gain + Gaussian blur),
//! - run a radius-bounded Hough-gradient transform to get candidate circles,
//! - assign candidates to the fixed press slots by ROI containment,
//!   first match wins.
//!
//! Slots left without a detection become sentinels downstream; the
//! [`recovery`] module re-runs the detector on tight crops of those slots.

pub mod assign;
pub mod detector;
pub mod hough;
pub mod preprocess;
pub mod profile;
pub mod recovery;

pub use assign::{assign_to_slots, RejectReason, RejectedCandidate, SlotAssignment};
pub use detector::{CircleDetector, DetectError};
pub use hough::{detect_circles, HoughParams};
pub use preprocess::{apply_profile, contrast_gain, gaussian_blur, gaussian_kernel};
pub use profile::{PreprocessProfile, RadiusBand, StepProfile, StepProfiles};
pub use recovery::{
    parse_crop_name, recover_missing, RecoveryCrop, RecoveryParams, RecoveryReport, SkipReason,
    StepBand,
};

#[cfg(test)]
pub(crate) mod test_utils;
