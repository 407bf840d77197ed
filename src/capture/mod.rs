//! # Capture Module
//!
//! Hardware seam of the pipeline. A [`Platform`] hands out the sensor and the
//! image encoder and supplies the side effects the controller needs (sleeping,
//! wall-clock time, output streams), so the whole run can be driven by a
//! virtual camera in tests.
//!
//! - [`sensor`]: the [`Sensor`] trait and the virtual [`TestPatternSensor`]
//! - [`encoder`]: the [`ImageEncoder`] trait and the CPU [`SoftwareEncoder`]
//! - [`preview`]: the preview renderer / null sink

pub mod encoder;
pub mod preview;
pub mod sensor;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::error::CaptureResult;

pub use encoder::{EncodeJob, ImageEncoder, SoftwareEncoder};
pub use preview::{PreviewKind, PreviewRenderer};
pub use sensor::{Sensor, SensorInfo, StillFrame, TestPatternSensor};

/// Writer a frame is streamed into.
pub type FrameWriter = Box<dyn Write + Send>;

/// Camera hardware and process environment used by a capture run.
pub trait Platform: Send + Sync {
    fn create_sensor(&self) -> CaptureResult<Box<dyn Sensor>>;

    fn create_encoder(&self) -> CaptureResult<Box<dyn ImageEncoder>> {
        Ok(Box::new(SoftwareEncoder::new()))
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn open_stdout(&self) -> FrameWriter {
        Box::new(io::stdout())
    }

    fn create_file(&self, path: &Path) -> io::Result<FrameWriter> {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}

/// Test-pattern camera with the software encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct VirtualPlatform;

impl Platform for VirtualPlatform {
    fn create_sensor(&self) -> CaptureResult<Box<dyn Sensor>> {
        Ok(Box::new(TestPatternSensor::default()))
    }
}
