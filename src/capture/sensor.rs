//! Image sensors behind the source node.
//!
//! [`TestPatternSensor`] is the built-in virtual sensor: it renders colour bars
//! over a gradient, honours the controls that have a visible effect on such a
//! pattern and produces an RGGB mosaic when raw capture is requested.

use image::{imageops, Rgb, RgbImage};
use tracing::debug;

use crate::config::camera::{CameraControl, CameraParams, ImageEffect};
use crate::error::{CaptureError, CaptureResult};

/// Identity and limits reported by a sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub make: String,
    pub model: String,
    pub max_width: u32,
    pub max_height: u32,
    pub supports_raw: bool,
}

/// One captured still.
#[derive(Debug, Clone)]
pub struct StillFrame {
    pub image: RgbImage,
    /// Bayer data, one byte per photosite, when raw capture was requested
    pub raw: Option<Vec<u8>>,
    pub sequence: u64,
}

impl StillFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A camera sensor driven by the source node.
pub trait Sensor: Send {
    fn info(&self) -> &SensorInfo;

    /// Powers the sensor up. Called when the source node is enabled.
    fn open(&mut self) -> CaptureResult<()>;

    /// Powers the sensor down. Must be safe to call when already closed.
    fn close(&mut self);

    fn apply(&mut self, control: &CameraControl) -> CaptureResult<()>;

    /// Readies the sensor for one still request. A refusal abandons the frame
    /// before anything is queued.
    fn arm_still(&mut self) -> CaptureResult<()> {
        Ok(())
    }

    fn capture_still(&mut self, width: u32, height: u32, raw: bool) -> CaptureResult<StillFrame>;
}

/// Virtual sensor producing a deterministic test pattern.
#[derive(Debug)]
pub struct TestPatternSensor {
    info: SensorInfo,
    params: CameraParams,
    open: bool,
    sequence: u64,
}

const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

impl Default for TestPatternSensor {
    fn default() -> Self {
        Self::new(SensorInfo {
            make: "RaspberryPi".to_string(),
            model: "RP_OV5647".to_string(),
            max_width: 2592,
            max_height: 1944,
            supports_raw: true,
        })
    }
}

impl TestPatternSensor {
    pub fn new(info: SensorInfo) -> Self {
        Self {
            info,
            params: CameraParams::default(),
            open: false,
            sequence: 0,
        }
    }

    pub fn params(&self) -> &CameraParams {
        &self.params
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn render(&self, width: u32, height: u32) -> RgbImage {
        let offset = self.params.brightness as i32 - 50;
        let negative = self.params.image_effect == ImageEffect::Negative;
        let mut image = RgbImage::from_fn(width, height, |x, y| {
            let bar = BARS[(x as usize * BARS.len()) / width.max(1) as usize];
            let shade = (y * 64 / height.max(1)) as i32;
            let px = bar.map(|c| {
                let v = (c as i32 - shade + offset).clamp(0, 255) as u8;
                if negative { 255 - v } else { v }
            });
            Rgb(px)
        });
        if self.params.hflip {
            imageops::flip_horizontal_in_place(&mut image);
        }
        if self.params.vflip {
            imageops::flip_vertical_in_place(&mut image);
        }
        if self.params.rotation == 180 {
            imageops::rotate180_in_place(&mut image);
        }
        image
    }
}

/// RGGB mosaic of an RGB image.
pub fn bayer_mosaic(image: &RgbImage) -> Vec<u8> {
    image
        .enumerate_pixels()
        .map(|(x, y, px)| match (x % 2, y % 2) {
            (0, 0) => px[0],
            (1, 1) => px[2],
            _ => px[1],
        })
        .collect()
}

impl Sensor for TestPatternSensor {
    fn info(&self) -> &SensorInfo {
        &self.info
    }

    fn open(&mut self) -> CaptureResult<()> {
        self.open = true;
        debug!(model = %self.info.model, "Sensor opened");
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            debug!(model = %self.info.model, "Sensor closed");
        }
        self.open = false;
    }

    fn apply(&mut self, control: &CameraControl) -> CaptureResult<()> {
        control
            .validate()
            .map_err(|reason| CaptureError::parameter(&self.info.model, control.name(), reason))?;
        let p = &mut self.params;
        match *control {
            CameraControl::Sharpness(v) => p.sharpness = v,
            CameraControl::Contrast(v) => p.contrast = v,
            CameraControl::Brightness(v) => p.brightness = v,
            CameraControl::Saturation(v) => p.saturation = v,
            CameraControl::Iso(v) => p.iso = v,
            CameraControl::ExposureCompensation(v) => p.exposure_compensation = v,
            CameraControl::Exposure(m) => p.exposure_mode = m,
            CameraControl::Awb(m) => p.awb_mode = m,
            CameraControl::Effect(e) => p.image_effect = e,
            CameraControl::Metering(m) => p.metering_mode = m,
            CameraControl::Rotation(r) => p.rotation = r,
            CameraControl::Flip { horizontal, vertical } => {
                p.hflip = horizontal;
                p.vflip = vertical;
            }
        }
        Ok(())
    }

    fn capture_still(&mut self, width: u32, height: u32, raw: bool) -> CaptureResult<StillFrame> {
        if !self.open {
            return Err(CaptureError::sensor("sensor is not open"));
        }
        if width == 0 || height == 0 || width > self.info.max_width || height > self.info.max_height {
            return Err(CaptureError::sensor(format!(
                "{}x{} outside sensor limits {}x{}",
                width, height, self.info.max_width, self.info.max_height
            )));
        }
        if raw && !self.info.supports_raw {
            return Err(CaptureError::sensor("raw capture not supported"));
        }
        self.sequence += 1;
        let image = self.render(width, height);
        let raw = raw.then(|| bayer_mosaic(&image));
        Ok(StillFrame {
            image,
            raw,
            sequence: self.sequence,
        })
    }
}
