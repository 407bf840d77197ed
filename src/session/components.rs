//! Setup of the camera and encoder nodes.
//!
//! Nodes are added to the graph by the controller before they are configured,
//! so a failure here leaves everything created so far to the normal teardown.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::StillConfig;
use crate::core::buffer_pool::BufferPool;
use crate::error::{CaptureResult, ErrorSeverity};
use crate::pipeline::{
    CameraConfig, Encoding, NodeId, Parameter, PipelineGraph, PortFormat, PortId, Rational,
    SOURCE_PREVIEW_PORT, SOURCE_STILL_PORT, SOURCE_VIDEO_PORT,
};

pub const CAMERA_NODE: &str = "camera";
pub const PREVIEW_NODE: &str = "preview";
pub const ENCODER_NODE: &str = "encoder";

/// Frame rate of the still port.
pub const STILL_FRAME_RATE: Rational = Rational::new(3, 1);
pub const PREVIEW_FRAME_RATE: Rational = Rational::new(30, 1);
/// Minimum buffers on the video and still ports.
pub const VIDEO_OUTPUT_BUFFERS_NUM: u32 = 3;
const PREVIEW_FRAMES: u32 = 3;

/// Configures and enables the camera node.
pub fn configure_source(graph: &mut PipelineGraph, camera: NodeId, config: &StillConfig) -> CaptureResult<()> {
    let control = graph.control_port(camera)?;
    let sensor = graph.sensor_info(camera)?;
    let preview_width = config.preview.window.width.clamp(1, sensor.max_width);
    let preview_height = config.preview.window.height.clamp(1, sensor.max_height);

    graph
        .set_parameter(
            control,
            Parameter::CameraConfig(CameraConfig {
                max_stills_width: config.width,
                max_stills_height: config.height,
                one_shot_stills: false,
                max_preview_width: preview_width,
                max_preview_height: preview_height,
                num_preview_frames: PREVIEW_FRAMES,
            }),
        )
        .map_err(|e| e.with_severity(ErrorSeverity::Fatal))?;

    for control_value in config.camera.controls() {
        if let Err(e) = graph.set_parameter(control, Parameter::Camera(control_value)) {
            warn!(control = control_value.name(), error = %e, "Camera control not applied");
        }
    }

    let mut preview_format = PortFormat::video(Encoding::Opaque, preview_width, preview_height, PREVIEW_FRAME_RATE);
    preview_format.encoding_variant = Some(Encoding::I420);
    let preview = graph.output_port(camera, SOURCE_PREVIEW_PORT)?;
    graph.commit_format(preview, preview_format)?;

    let video = graph.output_port(camera, SOURCE_VIDEO_PORT)?;
    graph.commit_format(video, preview_format)?;
    ensure_buffer_count(graph, video, VIDEO_OUTPUT_BUFFERS_NUM)?;

    let mut still_format = PortFormat::video(Encoding::Opaque, config.width, config.height, STILL_FRAME_RATE);
    still_format.encoding_variant = Some(Encoding::I420);
    let still = graph.output_port(camera, SOURCE_STILL_PORT)?;
    graph.commit_format(still, still_format)?;
    ensure_buffer_count(graph, still, VIDEO_OUTPUT_BUFFERS_NUM)?;

    graph.enable_node(camera)?;
    debug!(sensor = %sensor.model, width = config.width, height = config.height, "Camera component done");
    Ok(())
}

/// Configures and enables the encoder node and creates its output pool.
pub fn configure_encoder(
    graph: &mut PipelineGraph,
    encoder: NodeId,
    config: &StillConfig,
) -> CaptureResult<Arc<BufferPool>> {
    let control = graph.control_port(encoder)?;
    let output = graph.output_port(encoder, 0)?;

    let format = PortFormat::video(config.encoding.into(), config.width, config.height, Rational::new(0, 1));
    graph.commit_format(output, format)?;

    let requirements = *graph.port(output)?.buffers();
    let requested_num = config.encoder_buffers.count.unwrap_or(requirements.num_recommended);
    let requested_size = config.encoder_buffers.size.unwrap_or(requirements.size_recommended);
    let num = requested_num.max(requirements.num_min);
    let size = requested_size.max(requirements.size_min);
    if num != requested_num || size != requested_size {
        info!(
            requested_num,
            requested_size,
            num,
            size,
            "Encoder buffers raised to the port minimum"
        );
    }
    graph.set_buffers(output, num, size)?;

    graph
        .set_parameter(output, Parameter::JpegQuality(config.quality))
        .map_err(|e| e.with_severity(ErrorSeverity::Fatal))?;

    if let Err(e) = graph.set_parameter(control, Parameter::Thumbnail(config.thumbnail)) {
        warn!(error = %e, "Unable to set thumbnail configuration");
    }

    graph.enable_node(encoder)?;
    let pool = graph
        .create_pool(output)
        .map_err(|e| e.with_severity(ErrorSeverity::Fatal))?;
    debug!(encoding = %config.encoding, num, size, "Encoder component done");
    Ok(pool)
}

fn ensure_buffer_count(graph: &mut PipelineGraph, port: PortId, minimum: u32) -> CaptureResult<()> {
    let buffers = *graph.port(port)?.buffers();
    if buffers.num < minimum {
        graph.set_buffers(port, minimum, buffers.size)?;
    }
    Ok(())
}
