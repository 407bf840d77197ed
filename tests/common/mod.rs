//! Common test utilities and helpers for the still capture tests
//!
//! This module provides a recording platform that never really sleeps, sensors
//! and encoders that fail on demand, and assertions on the written images.

#![allow(dead_code)]

/// Platform doubles for driving whole runs without waiting
pub mod mock_platform {
    use std::collections::HashSet;
    use std::fs::File;
    use std::io::{self, BufWriter, Write};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use chrono::{DateTime, Local, TimeZone};
    use still_capture::capture::{
        EncodeJob, FrameWriter, ImageEncoder, Platform, Sensor, SensorInfo, SoftwareEncoder,
        StillFrame, TestPatternSensor,
    };
    use still_capture::config::CameraControl;
    use still_capture::{CaptureError, CaptureResult, ImageEncoding};

    /// Writer appending into a shared byte vector
    #[derive(Clone, Default)]
    pub struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// How the mock sensor misbehaves
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum SensorFault {
        #[default]
        None,
        Open,
        Capture,
        /// Refuses to arm for the n-th still request, counting from 1
        RefuseTrigger(u64),
    }

    /// How the mock encoder misbehaves
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum EncoderFault {
        #[default]
        None,
        Open,
        Encode,
        /// Encodes normally after sleeping this long
        Slow(Duration),
    }

    /// Test-pattern sensor with injectable failures
    pub struct FaultySensor {
        inner: TestPatternSensor,
        fault: SensorFault,
        applied: Arc<Mutex<Vec<CameraControl>>>,
        armed: u64,
    }

    impl Sensor for FaultySensor {
        fn info(&self) -> &SensorInfo {
            self.inner.info()
        }

        fn open(&mut self) -> CaptureResult<()> {
            if self.fault == SensorFault::Open {
                return Err(CaptureError::sensor("camera not detected"));
            }
            self.inner.open()
        }

        fn close(&mut self) {
            self.inner.close();
        }

        fn apply(&mut self, control: &CameraControl) -> CaptureResult<()> {
            self.applied.lock().unwrap().push(*control);
            self.inner.apply(control)
        }

        fn arm_still(&mut self) -> CaptureResult<()> {
            self.armed += 1;
            if self.fault == SensorFault::RefuseTrigger(self.armed) {
                return Err(CaptureError::sensor("sensor busy"));
            }
            self.inner.arm_still()
        }

        fn capture_still(&mut self, width: u32, height: u32, raw: bool) -> CaptureResult<StillFrame> {
            if self.fault == SensorFault::Capture {
                return Err(CaptureError::sensor("sensor timed out"));
            }
            self.inner.capture_still(width, height, raw)
        }
    }

    /// Software encoder with injectable failures
    pub struct FaultyEncoder {
        inner: SoftwareEncoder,
        fault: EncoderFault,
    }

    impl ImageEncoder for FaultyEncoder {
        fn name(&self) -> &str {
            "faulty encoder"
        }

        fn supports(&self, encoding: ImageEncoding) -> bool {
            self.inner.supports(encoding)
        }

        fn open(&mut self, encoding: ImageEncoding) -> CaptureResult<()> {
            if self.fault == EncoderFault::Open {
                return Err(CaptureError::node_enable("encoder", "no encoder resources"));
            }
            self.inner.open(encoding)
        }

        fn encode(&mut self, frame: &StillFrame, job: &EncodeJob) -> CaptureResult<Vec<u8>> {
            match self.fault {
                EncoderFault::Encode => Err(CaptureError::encode("bitstream overflow")),
                EncoderFault::Slow(delay) => {
                    thread::sleep(delay);
                    self.inner.encode(frame, job)
                }
                _ => self.inner.encode(frame, job),
            }
        }
    }

    /// Platform that records sleeps and opened outputs instead of waiting
    pub struct RecordingPlatform {
        pub sensor_fault: SensorFault,
        pub encoder_fault: EncoderFault,
        pub stdout: SharedBuffer,
        pub sleeps: Mutex<Vec<Duration>>,
        pub opened: Mutex<Vec<PathBuf>>,
        pub unwritable: Mutex<HashSet<PathBuf>>,
        pub applied: Arc<Mutex<Vec<CameraControl>>>,
        pub now: DateTime<Local>,
    }

    impl Default for RecordingPlatform {
        fn default() -> Self {
            Self {
                sensor_fault: SensorFault::None,
                encoder_fault: EncoderFault::None,
                stdout: SharedBuffer::default(),
                sleeps: Mutex::new(Vec::new()),
                opened: Mutex::new(Vec::new()),
                unwritable: Mutex::new(HashSet::new()),
                applied: Arc::new(Mutex::new(Vec::new())),
                now: Local.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap(),
            }
        }
    }

    impl RecordingPlatform {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn with_sensor_fault(fault: SensorFault) -> Arc<Self> {
            Arc::new(Self { sensor_fault: fault, ..Self::default() })
        }

        pub fn with_encoder_fault(fault: EncoderFault) -> Arc<Self> {
            Arc::new(Self { encoder_fault: fault, ..Self::default() })
        }

        /// Makes `create_file` fail for this path.
        pub fn refuse(&self, path: impl Into<PathBuf>) {
            self.unwritable.lock().unwrap().insert(path.into());
        }

        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }

        pub fn opened(&self) -> Vec<PathBuf> {
            self.opened.lock().unwrap().clone()
        }

        pub fn applied(&self) -> Vec<CameraControl> {
            self.applied.lock().unwrap().clone()
        }
    }

    impl Platform for RecordingPlatform {
        fn create_sensor(&self) -> CaptureResult<Box<dyn Sensor>> {
            Ok(Box::new(FaultySensor {
                inner: TestPatternSensor::default(),
                fault: self.sensor_fault,
                applied: Arc::clone(&self.applied),
                armed: 0,
            }))
        }

        fn create_encoder(&self) -> CaptureResult<Box<dyn ImageEncoder>> {
            Ok(Box::new(FaultyEncoder {
                inner: SoftwareEncoder::new(),
                fault: self.encoder_fault,
            }))
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }

        fn now(&self) -> DateTime<Local> {
            self.now
        }

        fn open_stdout(&self) -> FrameWriter {
            Box::new(self.stdout.clone())
        }

        fn create_file(&self, path: &Path) -> io::Result<FrameWriter> {
            if self.unwritable.lock().unwrap().contains(path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.opened.lock().unwrap().push(path.to_path_buf());
            Ok(Box::new(BufWriter::new(File::create(path)?)))
        }
    }
}

/// Ready-made configurations
pub mod test_configs {
    use std::path::Path;

    use still_capture::StillConfig;

    pub const SMALL_WIDTH: u32 = 160;
    pub const SMALL_HEIGHT: u32 = 120;

    /// Small single-shot capture into `dir/name`, preview off.
    pub fn small_config(dir: &Path, name: &str) -> StillConfig {
        let mut config = StillConfig {
            width: SMALL_WIDTH,
            height: SMALL_HEIGHT,
            output: Some(dir.join(name).display().to_string()),
            ..StillConfig::default()
        };
        config.preview.want_preview = false;
        config
    }

    /// Timelapse of `timeout_ms / interval_ms` frames.
    pub fn timelapse_config(dir: &Path, template: &str, timeout_ms: u64, interval_ms: u64) -> StillConfig {
        StillConfig {
            timeout_ms,
            timelapse_ms: interval_ms,
            ..small_config(dir, template)
        }
    }
}

/// Custom assertions for testing
pub mod assertions {
    use std::path::Path;

    use still_encode::jpeg;

    /// Assert that the bytes form a complete JPEG image of the given size
    pub fn assert_jpeg(bytes: &[u8], width: u32, height: u32) {
        assert!(bytes.len() > 4, "JPEG too short: {} bytes", bytes.len());
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "Missing SOI marker");
        let (image, _) = jpeg::split_raw_block(bytes);
        assert_eq!(&image[image.len() - 2..], &[0xFF, 0xD9], "Missing EOI marker");
        let decoded = image::load_from_memory(image).expect("JPEG does not decode");
        assert_eq!(
            (decoded.width(), decoded.height()),
            (width, height),
            "Image size mismatch"
        );
    }

    /// Assert that a file holds a JPEG of the given size and return its bytes
    pub fn assert_jpeg_file(path: &Path, width: u32, height: u32) -> Vec<u8> {
        let bytes = std::fs::read(path)
            .unwrap_or_else(|e| panic!("Cannot read {}: {e}", path.display()));
        assert_jpeg(&bytes, width, height);
        bytes
    }

    /// Metadata tags of a JPEG in file order
    pub fn tags(bytes: &[u8]) -> Vec<String> {
        jpeg::read_comments(bytes)
    }
}
