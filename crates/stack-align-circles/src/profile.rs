use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stack_align_core::Step;

/// Inclusive radius bounds in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadiusBand {
    pub min: f32,
    pub max: f32,
}

impl RadiusBand {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, r: f32) -> bool {
        r >= self.min && r <= self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min > 0.0 && self.max >= self.min
    }

    /// Shrink the band by `frac` of its width on both ends.
    ///
    /// `frac` is clamped to `[0, 0.5]`; at `0.5` the band collapses to its midpoint.
    pub fn narrowed(&self, frac: f32) -> Self {
        let frac = frac.clamp(0.0, 0.5);
        let cut = (self.max - self.min) * frac;
        Self {
            min: self.min + cut,
            max: self.max - cut,
        }
    }
}

/// Deterministic image preprocessing applied before circle detection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreprocessProfile {
    /// Multiplicative contrast gain, saturated to `0..=255`.
    pub contrast_gain: f32,
    /// Gaussian kernel size (odd, pixels). `0` or `1` disables blurring.
    pub blur_kernel: usize,
    /// Gaussian sigma (pixels).
    pub blur_sigma: f32,
}

impl Default for PreprocessProfile {
    fn default() -> Self {
        Self {
            contrast_gain: 1.0,
            blur_kernel: 9,
            blur_sigma: 2.0,
        }
    }
}

/// Detection profile of one assembly step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepProfile {
    pub step: Step,
    pub band: RadiusBand,
    #[serde(default)]
    pub preprocess: PreprocessProfile,
}

/// Fixed per-step profile table.
///
/// Step 3 (separator) is not photographed and has no profile by default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<StepProfile>", into = "Vec<StepProfile>")]
pub struct StepProfiles {
    profiles: BTreeMap<Step, StepProfile>,
}

const DEFAULT_BANDS: [(u8, f32, f32); 10] = [
    (0, 200.0, 250.0),
    (1, 200.0, 250.0),
    (2, 140.0, 180.0),
    (4, 170.0, 190.0),
    (5, 170.0, 190.0),
    (6, 125.0, 168.0),
    (7, 140.0, 198.0),
    (8, 140.0, 175.0),
    (9, 140.0, 185.0),
    (10, 160.0, 190.0),
];

impl StepProfiles {
    pub fn get(&self, step: Step) -> Option<&StepProfile> {
        self.profiles.get(&step)
    }

    /// Insert or replace the profile of `profile.step`.
    pub fn set(&mut self, profile: StepProfile) {
        self.profiles.insert(profile.step, profile);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepProfile> {
        self.profiles.values()
    }
}

impl Default for StepProfiles {
    fn default() -> Self {
        let profiles = DEFAULT_BANDS
            .iter()
            .filter_map(|&(step, min, max)| {
                let step = Step::new(step)?;
                Some((
                    step,
                    StepProfile {
                        step,
                        band: RadiusBand::new(min, max),
                        preprocess: PreprocessProfile::default(),
                    },
                ))
            })
            .collect();
        Self { profiles }
    }
}

impl From<Vec<StepProfile>> for StepProfiles {
    fn from(list: Vec<StepProfile>) -> Self {
        Self {
            profiles: list.into_iter().map(|p| (p.step, p)).collect(),
        }
    }
}

impl From<StepProfiles> for Vec<StepProfile> {
    fn from(table: StepProfiles) -> Self {
        table.profiles.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_skips_separator_step() {
        let table = StepProfiles::default();
        let step = |i| Step::new(i).expect("step");
        assert!(table.get(step(3)).is_none());
        assert_eq!(table.iter().count(), 10);
        let anode = table.get(step(2)).expect("anode profile");
        assert_eq!(anode.band, RadiusBand::new(140.0, 180.0));
    }

    #[test]
    fn narrowed_band_shrinks_symmetrically() {
        let band = RadiusBand::new(140.0, 180.0).narrowed(0.25);
        assert_eq!(band, RadiusBand::new(150.0, 170.0));
        let collapsed = RadiusBand::new(100.0, 120.0).narrowed(2.0);
        assert_eq!(collapsed, RadiusBand::new(110.0, 110.0));
        assert!(collapsed.is_valid());
    }

    #[test]
    fn later_entries_override_earlier_ones() {
        let step = Step::new(6).expect("step");
        let json = r#"[
            {"step": 6, "band": {"min": 120.0, "max": 160.0}},
            {"step": 6, "band": {"min": 125.0, "max": 150.0},
             "preprocess": {"contrast_gain": 1.5, "blur_kernel": 5, "blur_sigma": 2.0}}
        ]"#;
        let table: StepProfiles = serde_json::from_str(json).expect("parse");
        let p = table.get(step).expect("profile");
        assert_eq!(p.band.max, 150.0);
        assert_eq!(p.preprocess.blur_kernel, 5);
    }
}
