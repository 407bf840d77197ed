//! Arena of nodes, ports and connections.
//!
//! Nodes and connections live in slot vectors and are addressed by index
//! newtypes, so destroyed entries leave a hole instead of shifting ids.
//! Every disable and destroy operation is idempotent: calling it on something
//! already disabled, destroyed or never created is a no-op.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::unbounded;
use tracing::{debug, error, warn};

use crate::capture::encoder::ImageEncoder;
use crate::capture::preview::PreviewRenderer;
use crate::capture::sensor::{Sensor, SensorInfo};
use crate::core::buffer_pool::{BufferPool, MediaBuffer};
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::connection::Connection;
use crate::pipeline::parameter::Parameter;
use crate::pipeline::port::{
    spawn_delivery, BufferHandler, BufferRequirements, Port, PortDirection, PortFormat, PortId,
    PortShared, SendBufferError,
};
use crate::pipeline::stage::{EncoderStage, PreviewStage, SourceStage, Stage, StageContext};

/// Opaque handles carried on raw frame ports.
const OPAQUE_HANDLE_SIZE: usize = 128;
const CONTROL_BUFFERS: BufferRequirements = BufferRequirements::new(0, 0, 0, 0);
const RAW_PORT_BUFFERS: BufferRequirements =
    BufferRequirements::new(1, 3, OPAQUE_HANDLE_SIZE, OPAQUE_HANDLE_SIZE);
const ENCODED_PORT_BUFFERS: BufferRequirements = BufferRequirements::new(1, 3, 16 * 1024, 80 * 1024);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Source,
    Encoder,
    Preview,
}

/// A processing stage with its ports.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    role: NodeRole,
    name: String,
    control: PortId,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
    enabled: bool,
    pub(crate) stage: Stage,
    pool: Option<Arc<BufferPool>>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pool(&self) -> Option<&Arc<BufferPool>> {
        self.pool.as_ref()
    }

    fn ports(&self) -> impl Iterator<Item = PortId> + '_ {
        std::iter::once(self.control)
            .chain(self.inputs.iter().copied())
            .chain(self.outputs.iter().copied())
    }
}

/// Owner of every node, port and connection of a pipeline.
#[derive(Debug, Default)]
pub struct PipelineGraph {
    pub(super) nodes: Vec<Option<Node>>,
    pub(super) ports: Vec<Port>,
    pub(super) connections: Vec<Option<Connection>>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(
        &mut self,
        role: NodeRole,
        name: &str,
        inputs: &[BufferRequirements],
        outputs: &[BufferRequirements],
        build: impl FnOnce(&[Arc<PortShared>]) -> Stage,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut new_port = |direction, index, label: String, buffers| {
            let port_id = PortId(self.ports.len());
            self.ports.push(Port::new(port_id, id, direction, index, label, buffers));
            port_id
        };
        let control = new_port(PortDirection::Control, 0, format!("{name}:ctrl"), CONTROL_BUFFERS);
        let inputs: Vec<_> = inputs
            .iter()
            .enumerate()
            .map(|(i, b)| new_port(PortDirection::Input, i, format!("{name}:in{i}"), *b))
            .collect();
        let outputs: Vec<_> = outputs
            .iter()
            .enumerate()
            .map(|(i, b)| new_port(PortDirection::Output, i, format!("{name}:out{i}"), *b))
            .collect();
        let shared: Vec<_> = outputs
            .iter()
            .map(|p| Arc::clone(&self.ports[p.0].shared))
            .collect();
        let stage = build(&shared);
        self.nodes.push(Some(Node {
            id,
            role,
            name: name.to_string(),
            control,
            inputs,
            outputs,
            enabled: false,
            stage,
            pool: None,
        }));
        debug!(node = name, ?role, "Node created");
        id
    }

    /// Camera source with preview, video and still outputs.
    pub fn add_source(&mut self, name: &str, sensor: Box<dyn Sensor>) -> NodeId {
        self.add_node(
            NodeRole::Source,
            name,
            &[],
            &[RAW_PORT_BUFFERS; 3],
            |_| Stage::Source(SourceStage::new(sensor)),
        )
    }

    /// Still encoder with one raw input and one compressed output.
    pub fn add_encoder(&mut self, name: &str, encoder: Box<dyn ImageEncoder>) -> NodeId {
        self.add_node(
            NodeRole::Encoder,
            name,
            &[RAW_PORT_BUFFERS],
            &[ENCODED_PORT_BUFFERS],
            |outputs| Stage::Encoder(EncoderStage::new(encoder, Arc::clone(&outputs[0]))),
        )
    }

    pub fn add_preview(&mut self, name: &str, renderer: PreviewRenderer) -> NodeId {
        self.add_node(
            NodeRole::Preview,
            name,
            &[RAW_PORT_BUFFERS],
            &[],
            |_| Stage::Preview(PreviewStage::new(renderer)),
        )
    }

    pub fn node(&self, id: NodeId) -> CaptureResult<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| CaptureError::state("destroyed", format!("access to {id}")))
    }

    pub(super) fn node_mut(&mut self, id: NodeId) -> CaptureResult<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| CaptureError::state("destroyed", format!("access to {id}")))
    }

    pub fn port(&self, id: PortId) -> CaptureResult<&Port> {
        match self.ports.get(id.0) {
            Some(port) if port.live => Ok(port),
            _ => Err(CaptureError::state("destroyed", format!("access to {id}"))),
        }
    }

    pub(super) fn port_mut(&mut self, id: PortId) -> CaptureResult<&mut Port> {
        match self.ports.get_mut(id.0) {
            Some(port) if port.live => Ok(port),
            _ => Err(CaptureError::state("destroyed", format!("access to {id}"))),
        }
    }

    pub fn control_port(&self, node: NodeId) -> CaptureResult<PortId> {
        Ok(self.node(node)?.control)
    }

    pub fn input_port(&self, node: NodeId, index: usize) -> CaptureResult<PortId> {
        let node = self.node(node)?;
        node.inputs.get(index).copied().ok_or_else(|| {
            CaptureError::node_create(node.name.clone(), format!("no input port {index}"))
        })
    }

    pub fn output_port(&self, node: NodeId, index: usize) -> CaptureResult<PortId> {
        let node = self.node(node)?;
        node.outputs.get(index).copied().ok_or_else(|| {
            CaptureError::node_create(node.name.clone(), format!("no output port {index}"))
        })
    }

    /// Validates `format` against the owning stage and commits it.
    pub fn commit_format(&mut self, port: PortId, format: PortFormat) -> CaptureResult<()> {
        let (node_id, direction, name) = {
            let p = self.port(port)?;
            (p.node, p.direction, p.name().to_string())
        };
        let node = self.node_mut(node_id)?;
        node.stage
            .accepts(direction, &format)
            .map_err(|reason| CaptureError::port_format(name, reason))?;
        node.stage.format_committed(direction, &format);
        self.port_mut(port)?.format = format;
        Ok(())
    }

    /// Sets the buffer count and size; both must meet the port minimums.
    pub fn set_buffers(&mut self, port: PortId, num: u32, size: usize) -> CaptureResult<()> {
        let p = self.port_mut(port)?;
        if num < p.buffers.num_min || size < p.buffers.size_min {
            return Err(CaptureError::port_format(
                p.name(),
                format!(
                    "{num} x {size} bytes below minimum {} x {} bytes",
                    p.buffers.num_min, p.buffers.size_min
                ),
            ));
        }
        p.buffers.num = num;
        p.buffers.size = size;
        Ok(())
    }

    pub fn set_parameter(&mut self, port: PortId, parameter: Parameter) -> CaptureResult<()> {
        let (direction, index, format, node_id) = {
            let p = self.port(port)?;
            (p.direction, p.index, p.format, p.node)
        };
        let node = self.node_mut(node_id)?;
        let name = node.name.clone();
        node.stage.set_parameter(&name, direction, index, &format, parameter)
    }

    pub fn enable_node(&mut self, id: NodeId) -> CaptureResult<()> {
        let (outputs, formats): (Vec<_>, Vec<_>) = {
            let node = self.node(id)?;
            if node.enabled {
                return Ok(());
            }
            node.outputs
                .iter()
                .map(|p| (Arc::clone(&self.ports[p.0].shared), self.ports[p.0].format))
                .unzip()
        };
        let node = self.node_mut(id)?;
        let name = node.name.clone();
        node.stage.enable(
            &name,
            StageContext {
                outputs: &outputs,
                output_formats: &formats,
            },
        )?;
        node.enabled = true;
        debug!(node = %name, "Node enabled");
        Ok(())
    }

    pub fn disable_node(&mut self, id: NodeId) {
        if let Ok(node) = self.node_mut(id) {
            if node.enabled {
                node.stage.disable();
                node.enabled = false;
                debug!(node = %node.name, "Node disabled");
            }
        }
    }

    /// Releases a node, its ports and its pool. Leftover connections are destroyed.
    pub fn destroy_node(&mut self, id: NodeId) {
        let ports: Vec<PortId> = match self.node(id) {
            Ok(node) => node.ports().collect(),
            Err(_) => return,
        };
        self.disable_node(id);
        for port in &ports {
            if let Some(connection) = self.ports[port.0].connection {
                warn!(port = self.ports[port.0].name(), "Destroying node with a live connection");
                self.disconnect(connection);
            }
            self.disable_port(*port);
        }
        for port in &ports {
            let p = &mut self.ports[port.0];
            p.shared.set_tunnel(None);
            p.sink = None;
            p.live = false;
        }
        if let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) {
            if let Some(pool) = &node.pool {
                if pool.outstanding() > 0 {
                    warn!(node = %node.name, outstanding = pool.outstanding(), "Pool destroyed with buffers outstanding");
                }
            }
            debug!(node = %node.name, "Node destroyed");
        }
    }

    /// Creates the node-owned pool for an output port from its buffer settings.
    pub fn create_pool(&mut self, port: PortId) -> CaptureResult<Arc<BufferPool>> {
        let (node_id, buffers, name) = {
            let p = self.port(port)?;
            (p.node, p.buffers, p.name().to_string())
        };
        if buffers.num == 0 || buffers.size == 0 {
            return Err(CaptureError::buffer(name, "buffer count and size must be non-zero"));
        }
        let node = self.node_mut(node_id)?;
        if let Some(pool) = &node.pool {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(BufferPool::new(buffers.num as usize, buffers.size));
        node.pool = Some(Arc::clone(&pool));
        debug!(port = %name, num = buffers.num, size = buffers.size, "Buffer pool created");
        Ok(pool)
    }

    /// Enables an unconnected output port; filled buffers go to `handler`.
    pub fn enable_output_port(
        &mut self,
        port: PortId,
        handler: Arc<dyn BufferHandler>,
    ) -> CaptureResult<()> {
        let p = self.port_mut(port)?;
        if p.direction != PortDirection::Output {
            return Err(CaptureError::buffer(p.name(), "only output ports deliver buffers"));
        }
        if p.connection.is_some() {
            return Err(CaptureError::buffer(p.name(), "port is owned by a connection"));
        }
        if p.is_enabled() {
            return Err(CaptureError::buffer(p.name(), "port already enabled"));
        }
        let (tx, rx) = unbounded();
        p.shared.set_payload_sender(Some(tx));
        p.shared.set_enabled(true);
        match spawn_delivery(Arc::clone(&p.shared), rx, Arc::clone(&handler)) {
            Ok(worker) => {
                p.worker = Some(worker);
                p.handler = Some(handler);
                debug!(port = p.name(), "Output port enabled");
                Ok(())
            }
            Err(e) => {
                p.shared.set_enabled(false);
                p.shared.set_payload_sender(None);
                Err(CaptureError::buffer(p.name(), format!("cannot start delivery: {e}")))
            }
        }
    }

    /// Disables a port not owned by a connection. Buffers still queued on it
    /// are handed back through its handler with zero length.
    pub fn disable_port(&mut self, port: PortId) {
        let Some(p) = self.ports.get_mut(port.0) else {
            return;
        };
        if p.connection.is_some() {
            debug!(port = p.name(), "Port is owned by a connection, left to it");
            return;
        }
        if !p.is_enabled() && p.worker.is_none() {
            return;
        }
        p.shared.set_enabled(false);
        p.shared.set_payload_sender(None);
        if let Some(worker) = p.worker.take() {
            if worker.join().is_err() {
                error!(port = p.name(), "Delivery worker panicked");
            }
        }
        let leftover = p.shared.drain_submitted();
        match p.handler.take() {
            Some(handler) => {
                let handle = p.handle();
                for buffer in leftover {
                    handler.on_buffer(&handle, buffer);
                }
            }
            None if !leftover.is_empty() => {
                error!(port = p.name(), count = leftover.len(), "Buffers dropped on a port without handler");
            }
            None => {}
        }
        debug!(port = p.name(), "Port disabled");
    }

    /// Queues a buffer on an enabled output port.
    pub fn send_buffer(&self, port: PortId, buffer: MediaBuffer) -> Result<(), SendBufferError> {
        match self.ports.get(port.0) {
            Some(p) if p.live => p.shared.submit(buffer),
            Some(p) => Err(SendBufferError { port: p.name().to_string(), buffer }),
            None => Err(SendBufferError { port: port.to_string(), buffer }),
        }
    }

    pub fn sensor_info(&self, node: NodeId) -> CaptureResult<SensorInfo> {
        let node = self.node(node)?;
        node.stage
            .sensor_info()
            .cloned()
            .ok_or_else(|| CaptureError::state(node.name.clone(), "sensor query on a non-source node"))
    }

    pub fn preview_renderer(&self, node: NodeId) -> Option<Arc<PreviewRenderer>> {
        self.node(node).ok()?.stage.preview().cloned()
    }

    /// Nodes not yet destroyed.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Connections not yet destroyed.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().flatten().count()
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        let live: Vec<NodeId> = self.nodes.iter().flatten().map(Node::id).rev().collect();
        for id in live {
            self.destroy_node(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::encoder::SoftwareEncoder;
    use crate::capture::sensor::TestPatternSensor;
    use crate::config::PreviewConfig;
    use crate::pipeline::port::{Encoding, OutputPort, Rational};
    use still_encode::ImageEncoding;

    struct Release(Arc<BufferPool>);

    impl BufferHandler for Release {
        fn on_buffer(&self, _port: &OutputPort, buffer: MediaBuffer) {
            self.0.release(buffer);
        }
    }

    fn source(graph: &mut PipelineGraph) -> NodeId {
        graph.add_source("camera", Box::new(TestPatternSensor::default()))
    }

    #[test]
    fn test_ports_are_laid_out_per_role() {
        let mut graph = PipelineGraph::new();
        let camera = source(&mut graph);
        let encoder = graph.add_encoder("encoder", Box::new(SoftwareEncoder::new()));
        let preview = graph.add_preview("preview", PreviewRenderer::new(&PreviewConfig::default()));

        assert_eq!(graph.node(camera).unwrap().outputs().len(), 3);
        assert_eq!(graph.node(encoder).unwrap().inputs().len(), 1);
        assert_eq!(graph.node(preview).unwrap().outputs().len(), 0);
        let still = graph.output_port(camera, 2).unwrap();
        assert_eq!(graph.port(still).unwrap().name(), "camera:out2");
        assert!(graph.output_port(encoder, 1).is_err());
    }

    #[test]
    fn test_commit_format_validates() {
        let mut graph = PipelineGraph::new();
        let camera = source(&mut graph);
        let still = graph.output_port(camera, 2).unwrap();
        let too_big = PortFormat::video(Encoding::Opaque, 5000, 5000, Rational::new(3, 1));
        let err = graph.commit_format(still, too_big).unwrap_err();
        assert_eq!(err.category(), "port_format");

        let ok = PortFormat::video(Encoding::Opaque, 640, 480, Rational::new(3, 1));
        graph.commit_format(still, ok).unwrap();
        assert_eq!(graph.port(still).unwrap().format().width, 640);

        let encoder = graph.add_encoder("encoder", Box::new(SoftwareEncoder::new()));
        let out = graph.output_port(encoder, 0).unwrap();
        assert!(graph.commit_format(out, PortFormat::default()).is_err());
        let jpeg = PortFormat { encoding: ImageEncoding::Jpeg.into(), ..PortFormat::default() };
        graph.commit_format(out, jpeg).unwrap();
    }

    #[test]
    fn test_buffer_minimums() {
        let mut graph = PipelineGraph::new();
        let encoder = graph.add_encoder("encoder", Box::new(SoftwareEncoder::new()));
        let out = graph.output_port(encoder, 0).unwrap();
        assert!(graph.set_buffers(out, 0, 80 * 1024).is_err());
        assert!(graph.set_buffers(out, 3, 1024).is_err());
        graph.set_buffers(out, 4, 32 * 1024).unwrap();
        let pool = graph.create_pool(out).unwrap();
        assert_eq!((pool.buffer_num(), pool.buffer_size()), (4, 32 * 1024));
        // The node keeps a single pool.
        assert!(Arc::ptr_eq(&pool, &graph.create_pool(out).unwrap()));
    }

    #[test]
    fn test_disable_port_returns_queued_buffers() {
        let mut graph = PipelineGraph::new();
        let encoder = graph.add_encoder("encoder", Box::new(SoftwareEncoder::new()));
        let out = graph.output_port(encoder, 0).unwrap();
        let pool = graph.create_pool(out).unwrap();
        graph.enable_output_port(out, Arc::new(Release(Arc::clone(&pool)))).unwrap();
        assert!(graph.enable_output_port(out, Arc::new(Release(Arc::clone(&pool)))).is_err());

        for buffer in pool.drain_idle() {
            graph.send_buffer(out, buffer).unwrap();
        }
        assert_eq!(graph.port(out).unwrap().queued_buffers(), 3);

        graph.disable_port(out);
        graph.disable_port(out);
        assert_eq!(pool.idle_len(), 3);
        assert!(!graph.port(out).unwrap().is_enabled());

        let err = graph.send_buffer(out, pool.get().unwrap()).unwrap_err();
        pool.release(err.buffer);
        assert_eq!(pool.idle_len(), 3);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut graph = PipelineGraph::new();
        let camera = source(&mut graph);
        let still = graph.output_port(camera, 2).unwrap();
        graph
            .commit_format(still, PortFormat::video(Encoding::Opaque, 64, 48, Rational::new(3, 1)))
            .unwrap();
        graph.enable_node(camera).unwrap();
        graph.enable_node(camera).unwrap();

        graph.disable_node(camera);
        graph.disable_node(camera);
        graph.destroy_node(camera);
        graph.destroy_node(camera);
        assert_eq!(graph.node_count(), 0);
        assert!(graph.port(still).is_err());
        assert!(graph.sensor_info(camera).is_err());
    }

    #[test]
    fn test_parameters_route_to_stage() {
        let mut graph = PipelineGraph::new();
        let encoder = graph.add_encoder("encoder", Box::new(SoftwareEncoder::new()));
        let out = graph.output_port(encoder, 0).unwrap();
        let input = graph.input_port(encoder, 0).unwrap();
        graph.set_parameter(out, Parameter::JpegQuality(90)).unwrap();
        assert!(graph.set_parameter(out, Parameter::JpegQuality(101)).is_err());
        graph.set_parameter(out, Parameter::Exif("IFD0.Make=RaspberryPi".into())).unwrap();
        assert!(graph.set_parameter(out, Parameter::Exif("bogus".into())).is_err());
        assert!(graph.set_parameter(input, Parameter::Capture(true)).is_err());
    }
}
