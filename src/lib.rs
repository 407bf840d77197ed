//! # Still Capture Library
//!
//! Camera still capture built on an in-process component pipeline: a camera
//! source node, a still encoder node and a preview node, joined by tunnelled
//! connections. Encoded images leave the encoder through a recycled buffer
//! pool and are written to a file or to stdout, one file per frame.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `config`: run configuration, camera controls and argument helpers
//! - `core`: buffer pool and completion signal shared with delivery threads
//! - `capture`: the hardware seam (sensor, image encoder, preview renderer)
//! - `pipeline`: node/port/connection graph and buffer delivery
//! - `session`: the capture controller
//! - `error`: error types and their classification
//!
//! ## Modes
//!
//! - **Single shot**: wait for the timeout, capture one frame
//! - **Timelapse**: one frame every interval until the timeout, with the frame
//!   number substituted into the output name
//! - **Demo**: cycle camera settings without capturing
//!
//! ## Example
//!
//! ```rust,no_run
//! use still_capture::{capture_still, StillConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = StillConfig::default();
//! config.output = Some("still.jpg".to_string());
//! config.timeout_ms = 1000;
//! config.set_quality(90);
//!
//! let summary = capture_still(config)?;
//! println!("{} frame(s) written", summary.frames_captured);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod session;

/// Re-export error types for convenience
pub use error::{
    classify, CaptureError, CaptureResult, ErrorClass, ErrorSeverity, HasRecoverySuggestion,
    HasSeverity,
};

pub use capture::{Platform, VirtualPlatform};
pub use config::{StillConfig, ThumbnailConfig};
pub use session::{RunSummary, SessionState, StillSession};
pub use still_encode::ImageEncoding;

/// Runs one capture with the built-in virtual camera.
///
/// Blocks for the whole run: the configured timeout, or every timelapse
/// interval, plus encoding time. The pipeline is torn down before returning,
/// also when setup fails.
///
/// # Errors
///
/// Returns the configuration error for an invalid `config`, or the setup
/// error that ended the run. Failures of individual frames are not errors;
/// they are counted in the returned [`RunSummary`].
pub fn capture_still(config: StillConfig) -> CaptureResult<RunSummary> {
    capture_still_with(config, Arc::new(VirtualPlatform))
}

/// Like [`capture_still`], on the given platform.
pub fn capture_still_with(config: StillConfig, platform: Arc<dyn Platform>) -> CaptureResult<RunSummary> {
    let mut session = StillSession::builder().config(config).platform(platform).build()?;
    session.run()
}
