//! Parameters accepted by node ports.

use crate::config::{CameraControl, ThumbnailConfig};

/// Sensor modes requested on the source control port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConfig {
    pub max_stills_width: u32,
    pub max_stills_height: u32,
    /// Stop the sensor stream after each still
    pub one_shot_stills: bool,
    pub max_preview_width: u32,
    pub max_preview_height: u32,
    pub num_preview_frames: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// Start (`true`) a still capture on the source still port
    Capture(bool),
    /// Attach raw sensor data to stills
    EnableRawCapture(bool),
    CameraConfig(CameraConfig),
    Camera(CameraControl),
    JpegQuality(u32),
    Thumbnail(ThumbnailConfig),
    /// One `key=value` metadata tag for the next encoded image
    Exif(String),
}

impl Parameter {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Capture(_) => "capture",
            Self::EnableRawCapture(_) => "raw capture",
            Self::CameraConfig(_) => "camera config",
            Self::Camera(control) => control.name(),
            Self::JpegQuality(_) => "jpeg quality",
            Self::Thumbnail(_) => "thumbnail",
            Self::Exif(_) => "exif tag",
        }
    }
}
