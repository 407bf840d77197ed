//! Ports, formats and the buffer delivery path of output ports.
//!
//! A [`Port`] is owned by the graph and only touched by the controller. The
//! state that producer and consumer threads need lives in [`PortShared`]:
//! the enabled flag, the queue of submitted buffers, the payload channel of
//! the delivery worker and the tunnel to a downstream [`FrameSink`].
//!
//! Payloads handed to an enabled output port are cut into the buffers the
//! client submitted. Each filled buffer goes to the port's [`BufferHandler`];
//! the last one of a payload carries `FRAME_END`.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use still_encode::ImageEncoding;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::buffer_pool::{BufferFlags, MediaBuffer};
use crate::pipeline::connection::ConnectionId;
use crate::pipeline::graph::NodeId;
use crate::pipeline::stage::FrameSink;

/// How long a delivery worker waits for a buffer before rechecking the port state.
const BUFFER_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) usize);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Control,
    Input,
    Output,
}

/// Pixel or bitstream encoding carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Encoding {
    /// Hardware-private handles to frames
    Opaque,
    I420,
    Rgb24,
    Jpeg,
    Bmp,
    Gif,
    Png,
}

impl Encoding {
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Jpeg | Self::Bmp | Self::Gif | Self::Png)
    }

    pub fn as_image(self) -> Option<ImageEncoding> {
        match self {
            Self::Jpeg => Some(ImageEncoding::Jpeg),
            Self::Bmp => Some(ImageEncoding::Bmp),
            Self::Gif => Some(ImageEncoding::Gif),
            Self::Png => Some(ImageEncoding::Png),
            _ => None,
        }
    }
}

impl From<ImageEncoding> for Encoding {
    fn from(encoding: ImageEncoding) -> Self {
        match encoding {
            ImageEncoding::Jpeg => Self::Jpeg,
            ImageEncoding::Bmp => Self::Bmp,
            ImageEncoding::Gif => Self::Gif,
            ImageEncoding::Png => Self::Png,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Interval between frames, `None` for a zero rate.
    pub fn frame_interval(self) -> Option<Duration> {
        if self.num == 0 || self.den == 0 {
            return None;
        }
        Some(Duration::from_micros(1_000_000 * self.den as u64 / self.num as u64))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Format negotiated on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortFormat {
    pub encoding: Encoding,
    pub encoding_variant: Option<Encoding>,
    pub width: u32,
    pub height: u32,
    pub crop: Crop,
    pub frame_rate: Rational,
}

impl Default for PortFormat {
    fn default() -> Self {
        Self {
            encoding: Encoding::Opaque,
            encoding_variant: None,
            width: 0,
            height: 0,
            crop: Crop::default(),
            frame_rate: Rational::new(0, 1),
        }
    }
}

impl PortFormat {
    /// Uncompressed video format covering the full frame.
    pub fn video(encoding: Encoding, width: u32, height: u32, frame_rate: Rational) -> Self {
        Self {
            encoding,
            encoding_variant: None,
            width,
            height,
            crop: Crop {
                x: 0,
                y: 0,
                width,
                height,
            },
            frame_rate,
        }
    }
}

/// Buffer count and size a port works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    pub num: u32,
    pub num_min: u32,
    pub num_recommended: u32,
    pub size: usize,
    pub size_min: usize,
    pub size_recommended: usize,
}

impl BufferRequirements {
    pub const fn new(num_min: u32, num_recommended: u32, size_min: usize, size_recommended: usize) -> Self {
        Self {
            num: num_recommended,
            num_min,
            num_recommended,
            size: size_recommended,
            size_min,
            size_recommended,
        }
    }
}

/// Receives buffers filled by an output port.
///
/// Called from the port's delivery thread, and from the controller thread
/// while the port is being disabled (with empty buffers). Implementations must
/// be short and must never block on the controller.
pub trait BufferHandler: Send + Sync {
    fn on_buffer(&self, port: &OutputPort, buffer: MediaBuffer);
}

/// A buffer the port would not take back.
#[derive(Debug, Error)]
#[error("port '{port}' is not accepting buffers")]
pub struct SendBufferError {
    pub port: String,
    pub buffer: MediaBuffer,
}

/// Encoded data waiting to be cut into buffers.
#[derive(Debug, Default)]
pub(crate) struct Payload {
    pub bytes: Vec<u8>,
    pub failed: bool,
}

impl Payload {
    pub fn complete(bytes: Vec<u8>) -> Self {
        Self { bytes, failed: false }
    }

    pub fn failed() -> Self {
        Self { bytes: Vec::new(), failed: true }
    }
}

/// Port state shared with worker threads.
pub(crate) struct PortShared {
    name: String,
    enabled: AtomicBool,
    submitted: Mutex<VecDeque<MediaBuffer>>,
    buffer_ready: Condvar,
    payloads: Mutex<Option<Sender<Payload>>>,
    tunnel: Mutex<Option<Arc<dyn FrameSink>>>,
}

impl fmt::Debug for PortShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortShared")
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .field("queued", &self.queued())
            .finish()
    }
}

impl PortShared {
    pub fn new(name: String) -> Self {
        Self {
            name,
            enabled: AtomicBool::new(false),
            submitted: Mutex::new(VecDeque::new()),
            buffer_ready: Condvar::new(),
            payloads: Mutex::new(None),
            tunnel: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.buffer_ready.notify_all();
        }
    }

    pub fn queued(&self) -> usize {
        self.submitted.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn submit(&self, buffer: MediaBuffer) -> Result<(), SendBufferError> {
        if !self.is_enabled() {
            return Err(SendBufferError {
                port: self.name.clone(),
                buffer,
            });
        }
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(buffer);
        self.buffer_ready.notify_one();
        Ok(())
    }

    /// Waits for a submitted buffer; `None` once the port is disabled.
    fn next_buffer(&self) -> Option<MediaBuffer> {
        let mut queue = self.submitted.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if !self.is_enabled() {
                return None;
            }
            if let Some(buffer) = queue.pop_front() {
                return Some(buffer);
            }
            queue = self
                .buffer_ready
                .wait_timeout(queue, BUFFER_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    pub fn drain_submitted(&self) -> Vec<MediaBuffer> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Queues a payload for the delivery worker; `false` if none is running.
    pub fn deliver(&self, payload: Payload) -> bool {
        match self.payloads.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    pub fn set_payload_sender(&self, tx: Option<Sender<Payload>>) {
        *self.payloads.lock().unwrap_or_else(PoisonError::into_inner) = tx;
    }

    pub fn tunnel(&self) -> Option<Arc<dyn FrameSink>> {
        self.tunnel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_tunnel(&self, sink: Option<Arc<dyn FrameSink>>) {
        *self.tunnel.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }
}

/// Handle to an output port given to buffer handlers.
#[derive(Debug, Clone)]
pub struct OutputPort {
    shared: Arc<PortShared>,
}

impl OutputPort {
    pub(crate) fn new(shared: Arc<PortShared>) -> Self {
        Self { shared }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Hands a buffer to the port for filling.
    pub fn send_buffer(&self, buffer: MediaBuffer) -> Result<(), SendBufferError> {
        self.shared.submit(buffer)
    }
}

/// A port in the graph.
pub struct Port {
    pub(crate) id: PortId,
    pub(crate) node: NodeId,
    pub(crate) direction: PortDirection,
    pub(crate) index: usize,
    pub(crate) format: PortFormat,
    pub(crate) buffers: BufferRequirements,
    pub(crate) connection: Option<ConnectionId>,
    pub(crate) shared: Arc<PortShared>,
    pub(crate) handler: Option<Arc<dyn BufferHandler>>,
    pub(crate) worker: Option<JoinHandle<()>>,
    /// Consumer behind an input port
    pub(crate) sink: Option<Arc<dyn FrameSink>>,
    pub(crate) live: bool,
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("direction", &self.direction)
            .field("format", &self.format)
            .field("connection", &self.connection)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Port {
    pub(crate) fn new(
        id: PortId,
        node: NodeId,
        direction: PortDirection,
        index: usize,
        name: String,
        buffers: BufferRequirements,
    ) -> Self {
        Self {
            id,
            node,
            direction,
            index,
            format: PortFormat::default(),
            buffers,
            connection: None,
            shared: Arc::new(PortShared::new(name)),
            handler: None,
            worker: None,
            sink: None,
            live: true,
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn format(&self) -> &PortFormat {
        &self.format
    }

    pub fn buffers(&self) -> &BufferRequirements {
        &self.buffers
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Buffers submitted and not yet filled.
    pub fn queued_buffers(&self) -> usize {
        self.shared.queued()
    }

    pub(crate) fn handle(&self) -> OutputPort {
        OutputPort::new(Arc::clone(&self.shared))
    }
}

/// Starts the delivery worker of an output port.
pub(crate) fn spawn_delivery(
    shared: Arc<PortShared>,
    payloads: Receiver<Payload>,
    handler: Arc<dyn BufferHandler>,
) -> io::Result<JoinHandle<()>> {
    let name = format!("{}-delivery", shared.name());
    thread::Builder::new().name(name).spawn(move || {
        let port = OutputPort::new(shared);
        while let Ok(payload) = payloads.recv() {
            deliver_payload(&port, payload, handler.as_ref());
        }
        debug!(port = port.name(), "Delivery worker stopped");
    })
}

fn deliver_payload(port: &OutputPort, payload: Payload, handler: &dyn BufferHandler) {
    let total = payload.bytes.len();
    let mut offset = 0;
    loop {
        let Some(mut buffer) = port.shared.next_buffer() else {
            warn!(port = port.name(), dropped = total - offset, "Port disabled mid-frame");
            return;
        };
        let written = buffer.fill(&payload.bytes[offset..]);
        offset += written;

        let stalled = written == 0 && offset < total;
        let finished = offset >= total || stalled;
        let mut flags = BufferFlags::NONE;
        if finished {
            flags |= BufferFlags::FRAME_END;
        }
        if finished && (payload.failed || stalled) {
            flags |= BufferFlags::TRANSMISSION_FAILED;
        }
        buffer.set_flags(flags);
        handler.on_buffer(port, buffer);
        if finished {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer_pool::BufferPool;

    struct Collect {
        pool: Arc<BufferPool>,
        seen: Mutex<Vec<(Vec<u8>, BufferFlags)>>,
    }

    impl BufferHandler for Collect {
        fn on_buffer(&self, port: &OutputPort, mut buffer: MediaBuffer) {
            let bytes = buffer.lock().to_vec();
            self.seen.lock().unwrap().push((bytes, buffer.flags()));
            self.pool.release(buffer);
            if port.is_enabled() {
                if let Some(next) = self.pool.get() {
                    port.send_buffer(next).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_payload_split_across_buffers() {
        let pool = Arc::new(BufferPool::new(2, 4));
        let shared = Arc::new(PortShared::new("encoder:out0".into()));
        shared.set_enabled(true);
        for buffer in pool.drain_idle() {
            shared.submit(buffer).unwrap();
        }
        let handler = Collect { pool: Arc::clone(&pool), seen: Mutex::new(Vec::new()) };
        let port = OutputPort::new(Arc::clone(&shared));

        deliver_payload(&port, Payload::complete(b"0123456789".to_vec()), &handler);

        let seen = handler.seen.lock().unwrap();
        let chunks: Vec<_> = seen.iter().map(|(b, _)| b.clone()).collect();
        assert_eq!(chunks, vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]);
        assert_eq!(seen[0].1, BufferFlags::NONE);
        assert_eq!(seen[2].1, BufferFlags::FRAME_END);
        assert_eq!(pool.idle_len() + shared.queued(), 2);
    }

    #[test]
    fn test_failed_payload_flags() {
        let pool = Arc::new(BufferPool::new(1, 4));
        let shared = Arc::new(PortShared::new("encoder:out0".into()));
        shared.set_enabled(true);
        shared.submit(pool.get().unwrap()).unwrap();
        let handler = Collect { pool: Arc::clone(&pool), seen: Mutex::new(Vec::new()) };

        deliver_payload(&OutputPort::new(Arc::clone(&shared)), Payload::failed(), &handler);

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].0.is_empty());
        assert!(seen[0].1.contains(BufferFlags::TRANSMISSION_FAILED));
        assert!(seen[0].1.contains(BufferFlags::FRAME_END));
    }

    #[test]
    fn test_disabled_port_refuses_buffers() {
        let pool = BufferPool::new(1, 4);
        let shared = PortShared::new("encoder:out0".into());
        let err = shared.submit(pool.get().unwrap()).unwrap_err();
        assert_eq!(err.port, "encoder:out0");
        pool.release(err.buffer);
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(Rational::new(3, 1).frame_interval(), Some(Duration::from_micros(333_333)));
        assert_eq!(Rational::new(0, 1).frame_interval(), None);
    }
}
