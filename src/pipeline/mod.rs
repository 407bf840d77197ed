//! # Pipeline Module
//!
//! In-process model of a camera component graph.
//!
//! - [`graph`]: node/port arena and node lifecycle
//! - [`connection`]: tunnelled port-to-port connections
//! - [`port`]: port formats, buffer requirements and buffer delivery
//! - [`parameter`]: typed parameters set on ports
//! - [`stage`]: what each node does with frames

pub mod connection;
pub mod graph;
pub mod parameter;
pub mod port;
pub mod stage;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use graph::{Node, NodeId, NodeRole, PipelineGraph};
pub use parameter::{CameraConfig, Parameter};
pub use port::{
    BufferHandler, BufferRequirements, Crop, Encoding, OutputPort, Port, PortDirection, PortFormat,
    PortId, Rational, SendBufferError,
};
pub use stage::{
    Frame, FrameSink, PreviewFrame, SOURCE_PREVIEW_PORT, SOURCE_STILL_PORT, SOURCE_VIDEO_PORT,
};
