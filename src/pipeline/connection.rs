//! Tunnelled connections between an output port and an input port.
//!
//! Frames move directly from the producer to the consumer's [`FrameSink`];
//! the client never sees buffers on a tunnelled path. A connection is created,
//! then enabled. Disabling and destroying are both idempotent.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::port::{PortDirection, PortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Enabled,
}

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    output: PortId,
    input: PortId,
    state: ConnectionState,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn output(&self) -> PortId {
        self.output
    }

    pub fn input(&self) -> PortId {
        self.input
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ConnectionState::Enabled
    }
}

impl PipelineGraph {
    /// Creates and enables a connection; a connection that cannot be enabled is destroyed.
    pub fn connect(&mut self, output: PortId, input: PortId) -> CaptureResult<ConnectionId> {
        let id = self.create_connection(output, input)?;
        if let Err(e) = self.enable_connection(id) {
            self.destroy_connection(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Disables and destroys a connection. Unknown or destroyed ids are ignored.
    pub fn disconnect(&mut self, id: ConnectionId) {
        self.disable_connection(id);
        self.destroy_connection(id);
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id.0).and_then(Option::as_ref)
    }

    pub fn create_connection(&mut self, output: PortId, input: PortId) -> CaptureResult<ConnectionId> {
        let (out_name, in_name) = (self.port(output)?.name().to_string(), self.port(input)?.name().to_string());
        let refuse = |reason: &str| CaptureError::connection(out_name.clone(), in_name.clone(), reason);

        let (out, inp) = (self.port(output)?, self.port(input)?);
        if out.direction() != PortDirection::Output || inp.direction() != PortDirection::Input {
            return Err(refuse("connections run from an output port to an input port"));
        }
        if out.connection().is_some() || inp.connection().is_some() {
            return Err(refuse("port already connected"));
        }
        if out.is_enabled() || inp.is_enabled() {
            return Err(refuse("port already enabled"));
        }

        let id = ConnectionId(self.connections.len());
        self.connections.push(Some(Connection {
            id,
            output,
            input,
            state: ConnectionState::Created,
        }));
        self.port_mut(output)?.connection = Some(id);
        self.port_mut(input)?.connection = Some(id);
        debug!(%id, output = %out_name, input = %in_name, "Connection created");
        Ok(id)
    }

    /// Propagates the output format to the input and opens the tunnel.
    pub fn enable_connection(&mut self, id: ConnectionId) -> CaptureResult<()> {
        let (output, input) = match self.connection(id) {
            Some(c) if c.is_enabled() => return Ok(()),
            Some(c) => (c.output, c.input),
            None => return Err(CaptureError::state("destroyed", format!("enable {id}"))),
        };
        let (out_name, in_name) = (self.port(output)?.name().to_string(), self.port(input)?.name().to_string());
        let refuse = |reason: String| CaptureError::connection(out_name.clone(), in_name.clone(), reason);

        let format = *self.port(output)?.format();
        self.commit_format(input, format)
            .map_err(|e| refuse(format!("input rejected the output format: {e}")))?;

        let (input_node, input_index) = {
            let p = self.port(input)?;
            (p.node(), p.index())
        };
        let sink = self
            .node(input_node)?
            .stage
            .input_sink(input_index)
            .ok_or_else(|| refuse("input port has no consumer".to_string()))?;

        self.port_mut(input)?.sink = Some(sink.clone());
        let out = self.port(output)?;
        out.shared.set_tunnel(Some(sink));
        out.shared.set_enabled(true);
        self.port(input)?.shared.set_enabled(true);
        if let Some(c) = self.connections.get_mut(id.0).and_then(Option::as_mut) {
            c.state = ConnectionState::Enabled;
        }
        debug!(%id, output = %out_name, input = %in_name, "Connection enabled");
        Ok(())
    }

    pub fn disable_connection(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(id.0).and_then(Option::as_mut) else {
            return;
        };
        if !connection.is_enabled() {
            return;
        }
        connection.state = ConnectionState::Created;
        let (output, input) = (connection.output, connection.input);
        for port in [output, input] {
            if let Some(p) = self.ports.get(port.0) {
                p.shared.set_enabled(false);
                p.shared.set_tunnel(None);
            }
        }
        debug!(%id, "Connection disabled");
    }

    pub fn destroy_connection(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        if connection.is_enabled() {
            warn!(%id, "Destroying an enabled connection");
            for port in [connection.output, connection.input] {
                if let Some(p) = self.ports.get(port.0) {
                    p.shared.set_enabled(false);
                    p.shared.set_tunnel(None);
                }
            }
        }
        for port in [connection.output, connection.input] {
            if let Some(p) = self.ports.get_mut(port.0) {
                if p.connection == Some(id) {
                    p.connection = None;
                }
            }
        }
        debug!(%id, "Connection destroyed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::capture::encoder::SoftwareEncoder;
    use crate::capture::preview::PreviewRenderer;
    use crate::capture::sensor::TestPatternSensor;
    use crate::config::PreviewConfig;
    use crate::pipeline::graph::NodeId;
    use crate::pipeline::port::{Encoding, PortFormat, Rational};
    use crate::pipeline::stage::{SOURCE_PREVIEW_PORT, SOURCE_STILL_PORT};

    fn camera_and_preview() -> (PipelineGraph, NodeId, NodeId) {
        let mut graph = PipelineGraph::new();
        let camera = graph.add_source("camera", Box::new(TestPatternSensor::default()));
        let preview = graph.add_preview("preview", PreviewRenderer::new(&PreviewConfig::default()));
        let port = graph.output_port(camera, SOURCE_PREVIEW_PORT).unwrap();
        graph
            .commit_format(port, PortFormat::video(Encoding::Opaque, 320, 240, Rational::new(100, 1)))
            .unwrap();
        (graph, camera, preview)
    }

    #[test]
    fn test_connect_propagates_format() {
        let (mut graph, camera, preview) = camera_and_preview();
        let out = graph.output_port(camera, SOURCE_PREVIEW_PORT).unwrap();
        let input = graph.input_port(preview, 0).unwrap();
        let id = graph.connect(out, input).unwrap();

        assert!(graph.connection(id).unwrap().is_enabled());
        assert_eq!(graph.port(input).unwrap().format().width, 320);
        assert!(graph.port(out).unwrap().is_enabled());
        assert!(graph.connect(out, input).is_err());
    }

    #[test]
    fn test_preview_frames_flow_through_tunnel() {
        let (mut graph, camera, preview) = camera_and_preview();
        let out = graph.output_port(camera, SOURCE_PREVIEW_PORT).unwrap();
        let input = graph.input_port(preview, 0).unwrap();
        graph.connect(out, input).unwrap();
        graph.enable_node(preview).unwrap();
        graph.enable_node(camera).unwrap();

        let renderer = graph.preview_renderer(preview).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while renderer.frames_rendered() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        graph.disable_node(camera);
        assert!(renderer.frames_rendered() > 0);
    }

    #[test]
    fn test_failed_enable_destroys_connection() {
        let mut graph = PipelineGraph::new();
        let camera = graph.add_source("camera", Box::new(TestPatternSensor::default()));
        let encoder = graph.add_encoder("encoder", Box::new(SoftwareEncoder::new()));
        let still = graph.output_port(camera, SOURCE_STILL_PORT).unwrap();
        let input = graph.input_port(encoder, 0).unwrap();
        // The preview cannot render compressed frames.
        let encoded = graph.output_port(encoder, 0).unwrap();
        let preview = graph.add_preview("preview", PreviewRenderer::new(&PreviewConfig::default()));
        let preview_in = graph.input_port(preview, 0).unwrap();
        graph
            .commit_format(encoded, PortFormat { encoding: Encoding::Jpeg, ..PortFormat::default() })
            .unwrap();

        let err = graph.connect(encoded, preview_in).unwrap_err();
        assert_eq!(err.category(), "connection");
        assert_eq!(graph.connection_count(), 0);
        assert!(graph.port(encoded).unwrap().connection().is_none());
        assert!(!graph.port(preview_in).unwrap().is_enabled());

        graph.connect(still, input).unwrap();
        assert_eq!(graph.connection_count(), 1);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut graph, camera, preview) = camera_and_preview();
        let out = graph.output_port(camera, SOURCE_PREVIEW_PORT).unwrap();
        let input = graph.input_port(preview, 0).unwrap();
        let id = graph.connect(out, input).unwrap();

        graph.disconnect(id);
        graph.disconnect(id);
        assert!(graph.connection(id).is_none());
        assert!(graph.port(out).unwrap().connection().is_none());
        assert!(!graph.port(out).unwrap().is_enabled());

        // Ports are free again.
        graph.connect(out, input).unwrap();
    }

    #[test]
    fn test_direction_checked() {
        let (mut graph, camera, preview) = camera_and_preview();
        let out = graph.output_port(camera, SOURCE_PREVIEW_PORT).unwrap();
        let input = graph.input_port(preview, 0).unwrap();
        assert!(graph.connect(input, out).is_err());
        assert_eq!(graph.connection_count(), 0);
    }
}
