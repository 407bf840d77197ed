//! Demo mode: walk the camera through its settings without capturing.

use crate::config::{AwbMode, CameraControl, ExposureMode, ImageEffect, MeteringMode};

/// Endless sequence of camera controls, one per demo step.
///
/// Visits every exposure mode, white balance mode, image effect and metering
/// mode, then sweeps a few tuning values before starting over.
#[derive(Debug, Clone)]
pub struct DemoCycle {
    steps: Vec<CameraControl>,
    next: usize,
}

impl Default for DemoCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoCycle {
    pub fn new() -> Self {
        let mut steps: Vec<CameraControl> = Vec::new();
        steps.extend(ExposureMode::ALL.iter().copied().map(CameraControl::Exposure));
        steps.push(CameraControl::Exposure(ExposureMode::Auto));
        steps.extend(AwbMode::ALL.iter().copied().map(CameraControl::Awb));
        steps.push(CameraControl::Awb(AwbMode::Auto));
        steps.extend(ImageEffect::ALL.iter().copied().map(CameraControl::Effect));
        steps.push(CameraControl::Effect(ImageEffect::None));
        steps.extend(MeteringMode::ALL.iter().copied().map(CameraControl::Metering));
        steps.push(CameraControl::Metering(MeteringMode::Average));
        steps.extend([-50, 0, 50, 0].map(CameraControl::Contrast));
        steps.extend([-100, 0, 100, 0].map(CameraControl::Saturation));
        steps.extend([20, 50, 80, 50].map(CameraControl::Brightness));
        Self { steps, next: 0 }
    }

    /// Steps in one full pass.
    pub fn period(&self) -> usize {
        self.steps.len()
    }
}

impl Iterator for DemoCycle {
    type Item = CameraControl;

    fn next(&mut self) -> Option<CameraControl> {
        let step = self.steps[self.next];
        self.next = (self.next + 1) % self.steps.len();
        Some(step)
    }
}
