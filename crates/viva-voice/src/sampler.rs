//! Instantaneous input loudness.

use crate::tap::InputTap;

/// Peak absolute deviation from silence, clamped to `[0, 1]`. Empty input reads as 0.
pub fn peak_deviation(window: &[f32]) -> f32 {
    window
        .iter()
        .fold(0.0f32, |peak, s| peak.max(s.abs()))
        .min(1.0)
}

/// Reads the current loudness of the live input.
#[derive(Clone)]
pub struct VolumeSampler {
    tap: InputTap,
}

impl VolumeSampler {
    pub fn new(tap: InputTap) -> Self {
        Self { tap }
    }

    /// Loudness of the most recent analysis window.
    pub fn sample(&self) -> f32 {
        self.tap.with_window(peak_deviation)
    }
}
