//! # Still Capture Session
//!
//! [`StillSession`] owns the pipeline graph for one run and drives it through
//! its states:
//!
//! ```text
//! Idle -> Configured -> Connected -> Capturing <-> Waiting
//!                                        |
//!                                    Draining -> Closed
//! ```
//!
//! Setup creates the camera, preview and encoder nodes, connects the still
//! port to the encoder (and the preview port to the preview node when a
//! preview is wanted) and enables the encoder output with a reclaim handler.
//! Each frame then opens its destination, applies the metadata tags, feeds the
//! pool, triggers the still port and blocks until the handler posts the
//! completion signal.
//!
//! Per-frame failures are logged and only affect that frame. Setup failures
//! end the run. Teardown runs after every run, from whatever state the run
//! reached, and again on drop; repeating it is a no-op.

mod components;
mod demo;
mod destination;
mod exif;
mod output;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::capture::{Platform, PreviewRenderer, VirtualPlatform};
use crate::config::{FramePlan, StillConfig};
use crate::core::buffer_pool::BufferPool;
use crate::core::signal::CompletionSignal;
use crate::error::{classify, CaptureError, CaptureResult, ErrorClass, ErrorSeverity};
use crate::pipeline::{
    ConnectionId, NodeId, Parameter, PipelineGraph, PortId, SOURCE_PREVIEW_PORT, SOURCE_STILL_PORT,
    SOURCE_VIDEO_PORT,
};

pub use components::{
    CAMERA_NODE, ENCODER_NODE, PREVIEW_FRAME_RATE, PREVIEW_NODE, STILL_FRAME_RATE,
    VIDEO_OUTPUT_BUFFERS_NUM,
};
pub use demo::DemoCycle;
pub use destination::{expand_frame_template, Destination};
pub use exif::{capture_tags, system_tags, EXIF_TIMESTAMP_FORMAT};
pub use output::FrameStatus;

use output::{EncoderOutputHandler, SinkSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Configured,
    Connected,
    Capturing,
    Waiting,
    Draining,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Configured => "configured",
            Self::Connected => "connected",
            Self::Capturing => "capturing",
            Self::Waiting => "waiting",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Frames whose turn came, with or without a destination
    pub frames_attempted: u64,
    pub frames_captured: u64,
    /// Frames whose destination could not be opened
    pub frames_skipped: u64,
    /// Frames that were started but produced no complete image
    pub frames_failed: u64,
    pub demo_cycles: u64,
    pub bytes_written: u64,
    /// Files written, in capture order
    pub files: Vec<PathBuf>,
}

/// Builder for [`StillSession`].
pub struct StillSessionBuilder {
    config: StillConfig,
    platform: Arc<dyn Platform>,
}

impl Default for StillSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StillSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: StillConfig::default(),
            platform: Arc::new(VirtualPlatform),
        }
    }

    pub fn config(mut self, config: StillConfig) -> Self {
        self.config = config;
        self
    }

    pub fn platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    /// Normalizes and validates the configuration. No node is created before
    /// [`StillSession::run`].
    pub fn build(self) -> CaptureResult<StillSession> {
        let mut config = self.config;
        config.normalize();
        config.validate()?;
        Ok(StillSession {
            verbose: config.effective_verbose(),
            config,
            platform: self.platform,
            graph: PipelineGraph::new(),
            camera: None,
            preview: None,
            encoder: None,
            preview_connection: None,
            encoder_connection: None,
            encoder_output: None,
            pool: None,
            sink: Arc::new(SinkSlot::default()),
            complete: CompletionSignal::new(),
            state: SessionState::Idle,
        })
    }
}

/// Controller of one still capture run.
pub struct StillSession {
    config: StillConfig,
    platform: Arc<dyn Platform>,
    graph: PipelineGraph,
    camera: Option<NodeId>,
    preview: Option<NodeId>,
    encoder: Option<NodeId>,
    preview_connection: Option<ConnectionId>,
    encoder_connection: Option<ConnectionId>,
    encoder_output: Option<PortId>,
    pool: Option<Arc<BufferPool>>,
    sink: Arc<SinkSlot>,
    complete: CompletionSignal,
    state: SessionState,
    verbose: bool,
}

impl fmt::Debug for StillSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StillSession")
            .field("state", &self.state)
            .field("nodes", &self.graph.node_count())
            .field("connections", &self.graph.connection_count())
            .finish()
    }
}

impl StillSession {
    pub fn builder() -> StillSessionBuilder {
        StillSessionBuilder::new()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &StillConfig {
        &self.config
    }

    /// The pipeline graph, for inspection.
    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Buffers of the encoder output pool as `(idle, total)`.
    pub fn pool_stats(&self) -> Option<(usize, usize)> {
        self.pool.as_ref().map(|pool| pool.stats())
    }

    /// Runs the whole capture and tears the pipeline down.
    ///
    /// Setup failures are returned after teardown. Per-frame failures are
    /// logged and counted in the summary.
    pub fn run(&mut self) -> CaptureResult<RunSummary> {
        if self.state != SessionState::Idle {
            return Err(CaptureError::state(self.state.to_string(), "run"));
        }
        let result = self.setup().and_then(|()| self.capture());
        self.shutdown();
        result
    }

    fn setup(&mut self) -> CaptureResult<()> {
        let platform = Arc::clone(&self.platform);

        let sensor = platform
            .create_sensor()
            .map_err(|e| CaptureError::node_create(CAMERA_NODE, e.to_string()))?;
        let camera = self.graph.add_source(CAMERA_NODE, sensor);
        self.camera = Some(camera);
        components::configure_source(&mut self.graph, camera, &self.config)?;

        // Always created; a null sink when no preview is wanted.
        let preview = self.graph.add_preview(PREVIEW_NODE, PreviewRenderer::new(&self.config.preview));
        self.preview = Some(preview);
        self.graph.enable_node(preview)?;

        let image_encoder = platform
            .create_encoder()
            .map_err(|e| CaptureError::node_create(ENCODER_NODE, e.to_string()))?;
        let encoder = self.graph.add_encoder(ENCODER_NODE, image_encoder);
        self.encoder = Some(encoder);
        self.pool = Some(components::configure_encoder(&mut self.graph, encoder, &self.config)?);
        self.state = SessionState::Configured;
        if self.verbose {
            info!("Nodes created");
        }

        self.connect(camera, encoder)?;
        self.state = SessionState::Connected;
        if self.verbose {
            info!("Pipeline connected");
        }
        Ok(())
    }

    fn connect(&mut self, camera: NodeId, encoder: NodeId) -> CaptureResult<()> {
        if self.config.preview.want_preview {
            if let Some(preview) = self.preview {
                let output = self.graph.output_port(camera, SOURCE_PREVIEW_PORT)?;
                let input = self.graph.input_port(preview, 0)?;
                if self.verbose {
                    info!("Connecting camera preview port to preview input port");
                }
                self.preview_connection = Some(self.graph.connect(output, input)?);
            }
        }

        let still = self.graph.output_port(camera, SOURCE_STILL_PORT)?;
        let input = self.graph.input_port(encoder, 0)?;
        if self.verbose {
            info!("Connecting camera stills port to encoder input port");
        }
        self.encoder_connection = Some(self.graph.connect(still, input)?);

        if self.config.want_raw {
            if let Err(e) = self.graph.set_parameter(still, Parameter::EnableRawCapture(true)) {
                contain(e, "RAW was requested, but failed to enable")?;
            }
        }

        let output = self.graph.output_port(encoder, 0)?;
        let pool = self
            .pool
            .clone()
            .ok_or_else(|| CaptureError::state(self.state.to_string(), "connect without pool"))?;
        let handler = EncoderOutputHandler::new(pool, Arc::clone(&self.sink), self.complete.poster());
        self.graph
            .enable_output_port(output, Arc::new(handler))
            .map_err(|e| e.with_severity(ErrorSeverity::Fatal))?;
        self.encoder_output = Some(output);
        Ok(())
    }

    fn capture(&mut self) -> CaptureResult<RunSummary> {
        self.state = SessionState::Capturing;
        let mut summary = RunSummary::default();
        match self.config.frame_plan() {
            FramePlan::Demo { cycles, interval } => self.run_demo(cycles, interval, &mut summary)?,
            FramePlan::Capture { frames, delay } => {
                for frame in 1..=frames {
                    self.capture_frame(frame, delay, &mut summary)?;
                }
            }
        }
        if self.verbose {
            info!(
                captured = summary.frames_captured,
                skipped = summary.frames_skipped,
                failed = summary.frames_failed,
                "Capture finished"
            );
        }
        Ok(summary)
    }

    fn run_demo(&mut self, cycles: u64, interval: Duration, summary: &mut RunSummary) -> CaptureResult<()> {
        let camera = self.camera_node()?;
        let control = self.graph.control_port(camera)?;
        let mut steps = DemoCycle::new();
        for _ in 0..cycles {
            if let Some(step) = steps.next() {
                if let Err(e) = self.graph.set_parameter(control, Parameter::Camera(step)) {
                    contain(e.with_metadata("control", step.name()), "Demo step not applied")?;
                }
            }
            self.platform.sleep(interval);
            summary.demo_cycles += 1;
        }
        Ok(())
    }

    fn capture_frame(&mut self, frame: u64, delay: Duration, summary: &mut RunSummary) -> CaptureResult<()> {
        let _span = info_span!("frame", frame).entered();
        let camera = self.camera_node()?;
        let still = self.graph.output_port(camera, SOURCE_STILL_PORT)?;
        let output = self
            .encoder_output
            .ok_or_else(|| CaptureError::state(self.state.to_string(), "capture without encoder output"))?;

        self.platform.sleep(delay);
        summary.frames_attempted += 1;

        let Some(template) = self.config.output.as_deref() else {
            debug!(frame, "No output configured, nothing captured");
            return Ok(());
        };
        let destination = Destination::resolve(template, frame, self.config.is_timelapse());
        if destination.is_stdout() {
            self.verbose = false;
        }

        let writer = match destination.open(self.platform.as_ref()) {
            Ok(writer) => writer,
            Err(e) => {
                contain(e, "Unable to open output, frame skipped")?;
                summary.frames_skipped += 1;
                return Ok(());
            }
        };
        if self.verbose {
            info!(frame, %destination, "Opened output");
        }

        self.apply_tags(camera, output)?;
        self.sink.install(writer);
        self.complete.reset();
        self.feed_pool(output);

        // No frame end follows a refused trigger, so there is nothing to wait for.
        let triggered = self.graph.set_parameter(still, Parameter::Capture(true));
        let completed = triggered.is_ok() && self.wait_for_frame(frame);

        // Clear the sink before the destination is closed.
        let status = self.sink.take().map(|sink| sink.close());
        if let Err(e) = triggered {
            contain(e, "Failed to start capture")?;
        }
        match status {
            Some(Ok(status)) if completed && !status.failed && status.bytes > 0 => {
                summary.frames_captured += 1;
                summary.bytes_written += status.bytes;
                if let Some(path) = destination.path() {
                    summary.files.push(path.to_path_buf());
                }
                if self.verbose {
                    info!(frame, %destination, bytes = status.bytes, "Frame captured");
                }
            }
            Some(Ok(status)) => {
                summary.frames_failed += 1;
                if completed {
                    warn!(frame, %destination, bytes = status.bytes, "Frame incomplete");
                }
            }
            Some(Err(e)) => {
                summary.frames_failed += 1;
                error!(frame, %destination, error = %e, "Failed to close output");
            }
            None => summary.frames_failed += 1,
        }
        Ok(())
    }

    fn apply_tags(&mut self, camera: NodeId, output: PortId) -> CaptureResult<()> {
        let sensor = match self.graph.sensor_info(camera) {
            Ok(sensor) => sensor,
            Err(e) => return contain(e, "Sensor identity unavailable, metadata tags not applied"),
        };
        for tag in capture_tags(&sensor, &self.platform.now(), &self.config.exif_tags) {
            if let Err(e) = self.graph.set_parameter(output, Parameter::Exif(tag.clone())) {
                contain(e.with_metadata("tag", tag), "Metadata tag not applied")?;
            }
        }
        Ok(())
    }

    /// Sends every idle pool buffer to the encoder output port.
    fn feed_pool(&self, output: PortId) {
        let Some(pool) = &self.pool else {
            return;
        };
        for buffer in pool.drain_idle() {
            if let Err(e) = self.graph.send_buffer(output, buffer) {
                warn!(port = %e.port, "Unable to send a buffer to the encoder output port");
                pool.release(e.buffer);
            }
        }
    }

    fn wait_for_frame(&mut self, frame: u64) -> bool {
        self.state = SessionState::Waiting;
        let completed = match self.config.completion_timeout() {
            None => {
                self.complete.wait();
                true
            }
            Some(limit) => {
                let posted = self.complete.wait_timeout(limit);
                if !posted {
                    let e = CaptureError::timeout("still capture", limit.as_millis() as u64);
                    error!(frame, error = %e, "Frame did not complete");
                }
                posted
            }
        };
        self.state = SessionState::Capturing;
        completed
    }

    fn camera_node(&self) -> CaptureResult<NodeId> {
        self.camera
            .ok_or_else(|| CaptureError::state(self.state.to_string(), "camera access"))
    }

    /// Disables and destroys everything the run created.
    ///
    /// Ports not owned by a connection go first, then connections, then the
    /// nodes in reverse creation order. Safe to call from any state and any
    /// number of times.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Draining;
        if self.verbose {
            info!("Closing down");
        }

        if let Some(camera) = self.camera {
            if let Ok(video) = self.graph.output_port(camera, SOURCE_VIDEO_PORT) {
                self.graph.disable_port(video);
            }
        }
        if let Some(output) = self.encoder_output.take() {
            self.graph.disable_port(output);
        }

        if let Some(id) = self.preview_connection.take() {
            self.graph.disconnect(id);
        }
        if let Some(id) = self.encoder_connection.take() {
            self.graph.disconnect(id);
        }

        let nodes: Vec<NodeId> = [self.encoder, self.preview, self.camera].into_iter().flatten().collect();
        for node in &nodes {
            self.graph.disable_node(*node);
        }
        for node in &nodes {
            self.graph.destroy_node(*node);
        }
        (self.encoder, self.preview, self.camera) = (None, None, None);

        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                warn!(error = %e, "Failed to close output during teardown");
            }
        }
        if let Some(pool) = &self.pool {
            let (idle, total) = pool.stats();
            if idle != total {
                warn!(idle, total, "Buffers not returned to the pool");
            }
        }

        self.state = SessionState::Closed;
        if self.verbose {
            info!("Close down completed, all components disconnected, disabled and destroyed");
        }
    }
}

/// Logs an error raised after setup. Only fatal errors leave the capture loop.
fn contain(error: CaptureError, message: &str) -> CaptureResult<()> {
    match classify::class(&error) {
        ErrorClass::FatalSetup => Err(error),
        ErrorClass::FrameRecoverable => {
            error!(category = error.category(), details = ?error.context().metadata, %error, "{message}");
            Ok(())
        }
        ErrorClass::Warning => {
            warn!(category = error.category(), details = ?error.context().metadata, %error, "{message}");
            Ok(())
        }
    }
}

impl Drop for StillSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
