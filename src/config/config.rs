//! # Configuration Module
//!
//! [`StillConfig`] is the immutable description of one capture run. The CLI
//! builds it, the controller reads it and never re-validates individual
//! values. The parsing helpers in this module (`parse_thumbnail`,
//! `parse_demo_interval`, [`StillConfig::set_quality`]) apply the tolerant
//! rules of the command line: malformed optional values fall back to their
//! defaults and out-of-range quality is clamped.
//!
//! ## Defaults
//!
//! | Parameter | Default |
//! |-----------|---------|
//! | `timeout_ms` | 5000 |
//! | `width` x `height` | 2592 x 1944 |
//! | `quality` | 85 |
//! | `thumbnail` | 64:48:35 |
//! | `demo_interval_ms` | 250 |
//! | `encoding` | jpg |
//! | `timelapse_ms` | 0 (off) |
//!
//! ## Examples
//!
//! ```rust
//! use still_capture::config::{FramePlan, StillConfig};
//!
//! let mut config = StillConfig::default();
//! config.output = Some("frame%04d.jpg".to_string());
//! config.timeout_ms = 5000;
//! config.timelapse_ms = 1000;
//! assert!(config.validate().is_ok());
//!
//! match config.frame_plan() {
//!     FramePlan::Capture { frames, .. } => assert_eq!(frames, 5),
//!     FramePlan::Demo { .. } => unreachable!(),
//! }
//! ```

use std::time::Duration;

use serde::Serialize;
use still_encode::ImageEncoding;
use tracing::warn;

use crate::config::camera::CameraParams;
use crate::error::{CaptureError, CaptureResult};

/// Maximum number of user metadata tags kept per run.
pub const MAX_USER_EXIF_TAGS: usize = 32;
/// Maximum metadata tag length in bytes, terminator excluded.
pub const MAX_EXIF_TAG_LENGTH: usize = 127;
pub const MAX_QUALITY: u32 = 100;

/// Output name meaning "write to standard output".
pub const STDOUT_DESTINATION: &str = "-";

/// Embedded thumbnail settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThumbnailConfig {
    pub enable: bool,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enable: true,
            width: 64,
            height: 48,
            quality: 35,
        }
    }
}

impl ThumbnailConfig {
    pub fn disabled() -> Self {
        Self {
            enable: false,
            width: 0,
            height: 0,
            quality: 0,
        }
    }

    /// A thumbnail is only produced with both dimensions non-zero.
    pub fn is_active(&self) -> bool {
        self.enable && self.width > 0 && self.height > 0
    }
}

/// Ordered, bounded list of user `key=value` metadata tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExifTags(Vec<String>);

impl ExifTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tag, returning `false` once the list is full.
    pub fn push(&mut self, tag: impl Into<String>) -> bool {
        if self.0.len() >= MAX_USER_EXIF_TAGS {
            return false;
        }
        self.0.push(tag.into());
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Rectangle in display coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Preview renderer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewConfig {
    /// When false a null sink stands in for the renderer and is never connected.
    pub want_preview: bool,
    pub fullscreen: bool,
    pub window: Window,
    pub opacity: u8,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            want_preview: true,
            fullscreen: true,
            window: Window {
                x: 0,
                y: 0,
                width: 1024,
                height: 768,
            },
            opacity: 255,
        }
    }
}

/// Requested encoder output buffering. Values below the stage minimum are raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferRequest {
    pub count: Option<u32>,
    pub size: Option<usize>,
}

/// Full configuration of a still capture run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StillConfig {
    /// Total run time in milliseconds
    pub timeout_ms: u64,
    pub width: u32,
    pub height: u32,
    /// JPEG quality factor, 0..=100
    pub quality: u32,
    /// Append raw sensor data to the output
    pub want_raw: bool,
    /// Output name, `-` for stdout, `None` to capture nothing
    pub output: Option<String>,
    pub verbose: bool,
    pub thumbnail: ThumbnailConfig,
    pub demo_mode: bool,
    pub demo_interval_ms: u64,
    pub encoding: ImageEncoding,
    pub exif_tags: ExifTags,
    /// Delay between frames in milliseconds, 0 disables timelapse
    pub timelapse_ms: u64,
    /// Bound on the per-frame completion wait, `None` waits indefinitely
    pub completion_timeout_ms: Option<u64>,
    pub encoder_buffers: BufferRequest,
    pub preview: PreviewConfig,
    pub camera: CameraParams,
}

impl Default for StillConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            width: 2592,
            height: 1944,
            quality: 85,
            want_raw: false,
            output: None,
            verbose: false,
            thumbnail: ThumbnailConfig::default(),
            demo_mode: false,
            demo_interval_ms: 250,
            encoding: ImageEncoding::Jpeg,
            exif_tags: ExifTags::new(),
            timelapse_ms: 0,
            completion_timeout_ms: None,
            encoder_buffers: BufferRequest::default(),
            preview: PreviewConfig::default(),
            camera: CameraParams::default(),
        }
    }
}

/// How the capture loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePlan {
    /// Cycle camera settings, capture nothing
    Demo { cycles: u64, interval: Duration },
    /// Capture `frames` stills, sleeping `delay` before each
    Capture { frames: u64, delay: Duration },
}

impl StillConfig {
    /// Sets the JPEG quality, clamping values above 100.
    pub fn set_quality(&mut self, quality: u32) {
        if quality > MAX_QUALITY {
            warn!(requested = quality, "Setting max quality = {}", MAX_QUALITY);
            self.quality = MAX_QUALITY;
        } else {
            self.quality = quality;
        }
    }

    /// Adds a user tag; tags past the limit are dropped with a warning.
    pub fn add_exif_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.exif_tags.push(tag.clone()) {
            warn!(%tag, "Too many EXIF tags, dropping");
        }
    }

    pub fn writes_to_stdout(&self) -> bool {
        self.output.as_deref() == Some(STDOUT_DESTINATION)
    }

    /// Verbose diagnostics, forced off when the image goes to stdout.
    pub fn effective_verbose(&self) -> bool {
        self.verbose && !self.writes_to_stdout()
    }

    pub fn is_timelapse(&self) -> bool {
        self.timelapse_ms > 0
    }

    pub fn completion_timeout(&self) -> Option<Duration> {
        self.completion_timeout_ms.map(Duration::from_millis)
    }

    /// Applies the tolerant rules to values set directly on the struct:
    /// quality above 100 is clamped and a zero demo interval falls back to
    /// the default.
    pub fn normalize(&mut self) {
        self.set_quality(self.quality);
        if self.demo_mode && self.demo_interval_ms == 0 {
            warn!("Demo interval of 0 ms, using default");
            self.demo_interval_ms = parse_demo_interval(None);
        }
    }

    /// Structural checks done once before any node is created.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.width == 0 {
            return Err(CaptureError::config("width", "0", "must be greater than 0"));
        }
        if self.height == 0 {
            return Err(CaptureError::config("height", "0", "must be greater than 0"));
        }
        if matches!(self.output.as_deref(), Some("")) {
            return Err(CaptureError::config("output", "", "must not be empty"));
        }
        if self.completion_timeout_ms == Some(0) {
            return Err(CaptureError::config(
                "completion_timeout_ms",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Number of iterations and per-iteration delay.
    pub fn frame_plan(&self) -> FramePlan {
        if self.demo_mode {
            let interval = self.demo_interval_ms.max(1);
            FramePlan::Demo {
                cycles: self.timeout_ms / interval,
                interval: Duration::from_millis(interval),
            }
        } else if self.is_timelapse() {
            FramePlan::Capture {
                frames: self.timeout_ms / self.timelapse_ms,
                delay: Duration::from_millis(self.timelapse_ms),
            }
        } else {
            FramePlan::Capture {
                frames: 1,
                delay: Duration::from_millis(self.timeout_ms),
            }
        }
    }

    /// Pretty JSON dump used by verbose mode.
    pub fn to_json(&self) -> CaptureResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Parses `width:height:quality`. `none` disables the thumbnail; anything
/// malformed falls back to the default thumbnail.
pub fn parse_thumbnail(value: &str) -> ThumbnailConfig {
    if value.trim().eq_ignore_ascii_case("none") {
        return ThumbnailConfig::disabled();
    }
    let parts: Vec<_> = value.split(':').map(|p| p.trim().parse::<u32>()).collect();
    match parts.as_slice() {
        [Ok(width), Ok(height), Ok(quality)] => ThumbnailConfig {
            enable: true,
            width: *width,
            height: *height,
            quality: (*quality).min(MAX_QUALITY),
        },
        _ => {
            warn!(value, "Malformed thumbnail setting, using default");
            ThumbnailConfig::default()
        }
    }
}

/// Parses the optional demo interval; missing or malformed gives 250 ms.
pub fn parse_demo_interval(value: Option<&str>) -> u64 {
    let default = StillConfig::default().demo_interval_ms;
    match value.map(str::trim) {
        None | Some("") => default,
        Some(text) => match text.parse::<u64>() {
            Ok(ms) if ms > 0 => ms,
            _ => {
                warn!(value = text, "Malformed demo interval, using default");
                default
            }
        },
    }
}
