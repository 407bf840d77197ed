//! Node behaviours.
//!
//! Each node owns one [`Stage`]. The source stage runs a worker thread while
//! enabled: it emits preview frames into a connected preview sink at the
//! preview frame rate and services still capture requests. Stills travel
//! through the still port tunnel to the encoder stage, which compresses them
//! and hands the bytes to its output port for delivery.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use still_encode::ImageEncoding;
use tracing::{debug, error, trace, warn};

use crate::capture::encoder::{check_tag, EncodeJob, ImageEncoder};
use crate::capture::preview::PreviewRenderer;
use crate::capture::sensor::{Sensor, SensorInfo, StillFrame};
use crate::config::{ThumbnailConfig, MAX_USER_EXIF_TAGS};
use crate::error::{CaptureError, CaptureResult, ErrorSeverity};
use crate::pipeline::parameter::{CameraConfig, Parameter};
use crate::pipeline::port::{Encoding, Payload, PortDirection, PortFormat, PortShared};

pub const SOURCE_PREVIEW_PORT: usize = 0;
pub const SOURCE_VIDEO_PORT: usize = 1;
pub const SOURCE_STILL_PORT: usize = 2;

/// Preview rate used when the preview port has no frame rate.
const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_millis(33);
/// System tags plus the user tag limit.
const MAX_PENDING_TAGS: usize = MAX_USER_EXIF_TAGS + 4;

/// Preview frame metadata; the pixels stay on the source side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
}

/// Unit of data moving through a tunnel.
#[derive(Debug)]
pub enum Frame {
    Still(StillFrame),
    Preview(PreviewFrame),
    /// The producer could not deliver the requested still
    Failed(String),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Still(_) => "still",
            Self::Preview(_) => "preview",
            Self::Failed(_) => "failed",
        }
    }
}

/// Consumer on the input side of a tunnel.
pub trait FrameSink: Send + Sync {
    fn push(&self, frame: Frame);
}

pub(crate) enum Stage {
    Source(SourceStage),
    Encoder(EncoderStage),
    Preview(PreviewStage),
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(s) => f.debug_struct("Source").field("sensor", &s.info.model).finish(),
            Self::Encoder(_) => f.write_str("Encoder"),
            Self::Preview(p) => f.debug_struct("Preview").field("kind", &p.renderer.kind()).finish(),
        }
    }
}

/// What a stage needs from the graph when its node is enabled.
pub(crate) struct StageContext<'a> {
    pub outputs: &'a [Arc<PortShared>],
    pub output_formats: &'a [PortFormat],
}

impl Stage {
    /// Checks a format before it is committed to a port.
    pub fn accepts(&self, direction: PortDirection, format: &PortFormat) -> Result<(), String> {
        let raw = |f: &PortFormat| {
            if matches!(f.encoding, Encoding::Opaque | Encoding::I420 | Encoding::Rgb24) {
                Ok(())
            } else {
                Err(format!("{:?} is not a raw frame encoding", f.encoding))
            }
        };
        match (self, direction) {
            (_, PortDirection::Control) => Err("control ports carry no format".to_string()),
            (Self::Source(s), PortDirection::Output) => {
                raw(format)?;
                if format.width == 0 || format.height == 0 {
                    return Err("frame size must be non-zero".to_string());
                }
                if format.width > s.info.max_width || format.height > s.info.max_height {
                    return Err(format!(
                        "{}x{} exceeds sensor maximum {}x{}",
                        format.width, format.height, s.info.max_width, s.info.max_height
                    ));
                }
                if format.frame_rate.den == 0 {
                    return Err("frame rate denominator is zero".to_string());
                }
                Ok(())
            }
            (Self::Source(_), PortDirection::Input) => Err("source has no inputs".to_string()),
            (Self::Encoder(_), PortDirection::Input) => raw(format),
            (Self::Encoder(e), PortDirection::Output) => {
                let image = format
                    .encoding
                    .as_image()
                    .ok_or_else(|| format!("{:?} is not an image encoding", format.encoding))?;
                let encoder = e.encoder.lock().unwrap_or_else(PoisonError::into_inner);
                if encoder.supports(image) {
                    Ok(())
                } else {
                    Err(format!("{} cannot produce {}", encoder.name(), image))
                }
            }
            (Self::Preview(_), PortDirection::Input) => {
                if matches!(format.encoding, Encoding::Opaque | Encoding::I420) {
                    Ok(())
                } else {
                    Err(format!("preview cannot render {:?}", format.encoding))
                }
            }
            (Self::Preview(_), PortDirection::Output) => Err("preview has no outputs".to_string()),
        }
    }

    pub fn format_committed(&mut self, direction: PortDirection, format: &PortFormat) {
        if let (Self::Encoder(e), PortDirection::Output) = (self, direction) {
            if let Some(image) = format.encoding.as_image() {
                e.settings().encoding = image;
            }
        }
    }

    /// Consumer for an input port, wired into tunnels on connection.
    pub fn input_sink(&self, index: usize) -> Option<Arc<dyn FrameSink>> {
        match (self, index) {
            (Self::Encoder(e), 0) => Some(e.input.clone() as Arc<dyn FrameSink>),
            (Self::Preview(p), 0) => Some(p.renderer.clone() as Arc<dyn FrameSink>),
            _ => None,
        }
    }

    pub fn enable(&mut self, node: &str, ctx: StageContext<'_>) -> CaptureResult<()> {
        match self {
            Self::Source(s) => s.start(node, ctx),
            Self::Encoder(e) => e.start(node),
            Self::Preview(_) => Ok(()),
        }
    }

    pub fn disable(&mut self) {
        match self {
            Self::Source(s) => s.stop(),
            Self::Encoder(e) => e.input.active.store(false, Ordering::Release),
            Self::Preview(_) => {}
        }
    }

    pub fn set_parameter(
        &mut self,
        node: &str,
        direction: PortDirection,
        index: usize,
        format: &PortFormat,
        parameter: Parameter,
    ) -> CaptureResult<()> {
        let unsupported = |p: &Parameter| {
            CaptureError::parameter(node, p.name(), "not supported on this port")
        };
        match self {
            Self::Source(s) => match (direction, index, parameter) {
                (_, _, Parameter::Capture(false)) => Ok(()),
                (PortDirection::Output, SOURCE_STILL_PORT, Parameter::Capture(true)) => {
                    s.trigger(node, format)
                }
                (PortDirection::Output, SOURCE_STILL_PORT, Parameter::EnableRawCapture(on)) => {
                    if on && !s.info.supports_raw {
                        return Err(CaptureError::parameter(node, "raw capture", "sensor has no raw output"));
                    }
                    s.raw_capture = on;
                    Ok(())
                }
                (PortDirection::Control, _, Parameter::CameraConfig(config)) => s.configure(node, config),
                (PortDirection::Control, _, Parameter::Camera(control)) => s
                    .sensor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(&control),
                (_, _, other) => Err(unsupported(&other)),
            },
            Self::Encoder(e) => match (direction, parameter) {
                (PortDirection::Output, Parameter::JpegQuality(quality)) => {
                    if quality > 100 {
                        return Err(CaptureError::parameter(node, "jpeg quality", format!("{quality} above 100")));
                    }
                    e.settings().quality = quality;
                    Ok(())
                }
                (PortDirection::Control | PortDirection::Output, Parameter::Thumbnail(thumbnail)) => {
                    e.settings().thumbnail = thumbnail;
                    Ok(())
                }
                (PortDirection::Output, Parameter::Exif(tag)) => {
                    check_tag(&tag).map_err(|reason| {
                        CaptureError::parameter(node, "exif tag", reason).with_metadata("tag", tag.clone())
                    })?;
                    let mut settings = e.settings();
                    // Setting a key again replaces its value in place.
                    if let Some(slot) = settings.pending_tags.iter_mut().find(|t| tag_key(t) == tag_key(&tag)) {
                        *slot = tag;
                        return Ok(());
                    }
                    if settings.pending_tags.len() >= MAX_PENDING_TAGS {
                        return Err(CaptureError::parameter(node, "exif tag", "too many pending tags"));
                    }
                    settings.pending_tags.push(tag);
                    Ok(())
                }
                (_, other) => Err(unsupported(&other)),
            },
            Self::Preview(_) => Err(unsupported(&parameter)),
        }
    }

    pub fn sensor_info(&self) -> Option<&SensorInfo> {
        match self {
            Self::Source(s) => Some(&s.info),
            _ => None,
        }
    }

    pub fn preview(&self) -> Option<&Arc<PreviewRenderer>> {
        match self {
            Self::Preview(p) => Some(&p.renderer),
            _ => None,
        }
    }
}

fn tag_key(tag: &str) -> &str {
    tag.split_once('=').map_or(tag, |(key, _)| key.trim())
}

struct StillRequest {
    width: u32,
    height: u32,
    raw: bool,
}

/// Camera source: preview, video and still outputs.
pub(crate) struct SourceStage {
    sensor: Arc<Mutex<Box<dyn Sensor>>>,
    info: SensorInfo,
    camera_config: Option<CameraConfig>,
    raw_capture: bool,
    requests: Option<Sender<StillRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl SourceStage {
    pub fn new(sensor: Box<dyn Sensor>) -> Self {
        let info = sensor.info().clone();
        Self {
            sensor: Arc::new(Mutex::new(sensor)),
            info,
            camera_config: None,
            raw_capture: false,
            requests: None,
            worker: None,
        }
    }

    fn configure(&mut self, node: &str, config: CameraConfig) -> CaptureResult<()> {
        if config.max_stills_width > self.info.max_width || config.max_stills_height > self.info.max_height {
            return Err(CaptureError::parameter(
                node,
                "camera config",
                format!(
                    "stills {}x{} exceed sensor maximum {}x{}",
                    config.max_stills_width, config.max_stills_height, self.info.max_width, self.info.max_height
                ),
            ));
        }
        self.camera_config = Some(config);
        Ok(())
    }

    fn start(&mut self, node: &str, ctx: StageContext<'_>) -> CaptureResult<()> {
        if self.requests.is_some() {
            return Ok(());
        }
        let (Some(preview), Some(still)) = (
            ctx.outputs.get(SOURCE_PREVIEW_PORT).cloned(),
            ctx.outputs.get(SOURCE_STILL_PORT).cloned(),
        ) else {
            return Err(CaptureError::node_enable(node, "source ports missing"));
        };
        let preview_format = ctx.output_formats.get(SOURCE_PREVIEW_PORT).copied().unwrap_or_default();

        self.sensor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open()
            .map_err(|e| CaptureError::node_enable(node, e.to_string()))?;

        let (tx, rx) = unbounded();
        let sensor = Arc::clone(&self.sensor);
        let interval = preview_format.frame_rate.frame_interval().unwrap_or(DEFAULT_PREVIEW_INTERVAL);
        let spawned = thread::Builder::new()
            .name(format!("{node}-source"))
            .spawn(move || source_worker(sensor, rx, preview, still, preview_format, interval));
        match spawned {
            Ok(handle) => {
                self.requests = Some(tx);
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.sensor.lock().unwrap_or_else(PoisonError::into_inner).close();
                Err(CaptureError::node_enable(node, format!("cannot start source worker: {e}")))
            }
        }
    }

    fn stop(&mut self) {
        // Dropping the sender ends the worker loop.
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(sensor = %self.info.model, "Source worker panicked");
            }
        }
        self.sensor.lock().unwrap_or_else(PoisonError::into_inner).close();
    }

    fn trigger(&self, node: &str, format: &PortFormat) -> CaptureResult<()> {
        let refuse = |reason: &str| {
            CaptureError::parameter(node, "capture", reason).with_severity(ErrorSeverity::Error)
        };
        if let Some(config) = &self.camera_config {
            if format.width > config.max_stills_width || format.height > config.max_stills_height {
                return Err(refuse("still size exceeds the configured maximum"));
            }
        }
        let requests = self.requests.as_ref().ok_or_else(|| refuse("source is not enabled"))?;
        self.sensor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .arm_still()
            .map_err(|e| refuse(&e.to_string()))?;
        requests
            .send(StillRequest {
                width: format.width,
                height: format.height,
                raw: self.raw_capture,
            })
            .map_err(|_| refuse("source worker stopped"))
    }
}

fn source_worker(
    sensor: Arc<Mutex<Box<dyn Sensor>>>,
    requests: Receiver<StillRequest>,
    preview: Arc<PortShared>,
    still: Arc<PortShared>,
    preview_format: PortFormat,
    interval: Duration,
) {
    let mut sequence = 0u64;
    loop {
        match requests.recv_timeout(interval) {
            Ok(request) => {
                let captured = sensor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .capture_still(request.width, request.height, request.raw);
                let frame = match captured {
                    Ok(frame) => Frame::Still(frame),
                    Err(e) => {
                        error!(error = %e, "Still capture failed");
                        Frame::Failed(e.to_string())
                    }
                };
                match still.tunnel() {
                    Some(sink) if still.is_enabled() => sink.push(frame),
                    _ => warn!(port = still.name(), "Still port not connected, frame dropped"),
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !preview.is_enabled() {
                    continue;
                }
                if let Some(sink) = preview.tunnel() {
                    sequence += 1;
                    sink.push(Frame::Preview(PreviewFrame {
                        sequence,
                        width: preview_format.width,
                        height: preview_format.height,
                    }));
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(preview_frames = sequence, "Source worker stopped");
}

#[derive(Debug, Clone)]
struct EncoderSettings {
    encoding: ImageEncoding,
    quality: u32,
    thumbnail: ThumbnailConfig,
    pending_tags: Vec<String>,
}

impl EncoderSettings {
    fn take_job(&mut self) -> EncodeJob {
        EncodeJob {
            encoding: self.encoding,
            quality: self.quality,
            thumbnail: self.thumbnail,
            tags: std::mem::take(&mut self.pending_tags),
        }
    }
}

/// Still image encoder: one raw input, one compressed output.
pub(crate) struct EncoderStage {
    encoder: Arc<Mutex<Box<dyn ImageEncoder>>>,
    settings: Arc<Mutex<EncoderSettings>>,
    input: Arc<EncoderInput>,
}

impl EncoderStage {
    pub fn new(encoder: Box<dyn ImageEncoder>, output: Arc<PortShared>) -> Self {
        let encoder = Arc::new(Mutex::new(encoder));
        let settings = Arc::new(Mutex::new(EncoderSettings {
            encoding: ImageEncoding::Jpeg,
            quality: 85,
            thumbnail: ThumbnailConfig::disabled(),
            pending_tags: Vec::new(),
        }));
        let input = Arc::new(EncoderInput {
            encoder: Arc::clone(&encoder),
            settings: Arc::clone(&settings),
            output,
            active: AtomicBool::new(false),
        });
        Self { encoder, settings, input }
    }

    fn settings(&self) -> std::sync::MutexGuard<'_, EncoderSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&mut self, node: &str) -> CaptureResult<()> {
        let encoding = self.settings().encoding;
        self.encoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open(encoding)
            .map_err(|e| CaptureError::node_enable(node, e.to_string()))?;
        self.input.active.store(true, Ordering::Release);
        Ok(())
    }
}

/// Encoder input side of the still tunnel.
pub(crate) struct EncoderInput {
    encoder: Arc<Mutex<Box<dyn ImageEncoder>>>,
    settings: Arc<Mutex<EncoderSettings>>,
    output: Arc<PortShared>,
    active: AtomicBool,
}

impl FrameSink for EncoderInput {
    fn push(&self, frame: Frame) {
        if !self.active.load(Ordering::Acquire) {
            warn!(frame = frame.kind(), "Encoder disabled, frame dropped");
            return;
        }
        let payload = match frame {
            Frame::Still(still) => {
                let job = self.settings.lock().unwrap_or_else(PoisonError::into_inner).take_job();
                let encoded = self
                    .encoder
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .encode(&still, &job);
                match encoded {
                    Ok(bytes) => {
                        trace!(bytes = bytes.len(), encoding = %job.encoding, "Still encoded");
                        Payload::complete(bytes)
                    }
                    Err(e) => {
                        error!(error = %e, "Encoding failed");
                        Payload::failed()
                    }
                }
            }
            Frame::Failed(reason) => {
                debug!(%reason, "Upstream failure forwarded");
                Payload::failed()
            }
            Frame::Preview(_) => return,
        };
        if !self.output.deliver(payload) {
            warn!(port = self.output.name(), "Encoder output not enabled, image discarded");
        }
    }
}

/// Preview renderer or null sink.
pub(crate) struct PreviewStage {
    renderer: Arc<PreviewRenderer>,
}

impl PreviewStage {
    pub fn new(renderer: PreviewRenderer) -> Self {
        Self {
            renderer: Arc::new(renderer),
        }
    }
}
