//! Encoder output side of a capture: the destination slot shared with the
//! delivery thread and the handler that recycles buffers.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, trace, warn};

use crate::capture::FrameWriter;
use crate::core::buffer_pool::{BufferFlags, BufferPool, MediaBuffer};
use crate::core::signal::SignalPoster;
use crate::pipeline::port::{BufferHandler, OutputPort};

/// What a frame's destination received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStatus {
    pub bytes: u64,
    /// A write failed or the pipeline flagged the frame as failed
    pub failed: bool,
}

/// An open destination.
pub(crate) struct OpenSink {
    writer: FrameWriter,
    status: FrameStatus,
}

impl OpenSink {
    /// Flushes and closes the destination.
    pub fn close(mut self) -> io::Result<FrameStatus> {
        self.writer.flush()?;
        Ok(self.status)
    }
}

/// Destination handle shared between the controller and the delivery thread.
///
/// Only the controller installs and takes the sink. The delivery thread writes
/// through it and finds it empty for buffers that arrive after the frame ended.
#[derive(Default)]
pub(crate) struct SinkSlot {
    sink: Mutex<Option<OpenSink>>,
}

impl SinkSlot {
    pub fn install(&self, writer: FrameWriter) {
        let mut slot = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("Replacing a destination that was never closed");
        }
        *slot = Some(OpenSink {
            writer,
            status: FrameStatus::default(),
        });
    }

    pub fn take(&self) -> Option<OpenSink> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn write(&self, buffer: &mut MediaBuffer) {
        let mut slot = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sink) = slot.as_mut() else {
            trace!(bytes = buffer.len(), "No destination open, buffer contents dropped");
            return;
        };
        let memory = buffer.lock();
        match sink.writer.write_all(&memory) {
            Ok(()) => sink.status.bytes += memory.len() as u64,
            Err(e) => {
                error!(error = %e, "Failed to write buffer data, aborting frame");
                sink.status.failed = true;
            }
        }
    }

    fn mark_failed(&self) {
        if let Some(sink) = self.sink.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            sink.status.failed = true;
        }
    }
}

/// Reclaims buffers filled by the encoder output port.
///
/// Writes the payload to the open destination, returns the buffer to the
/// pool, hands an idle buffer back to the port while it is enabled and posts
/// the completion signal on the last buffer of a frame.
pub(crate) struct EncoderOutputHandler {
    pool: Arc<BufferPool>,
    sink: Arc<SinkSlot>,
    complete: SignalPoster,
}

impl EncoderOutputHandler {
    pub fn new(pool: Arc<BufferPool>, sink: Arc<SinkSlot>, complete: SignalPoster) -> Self {
        Self { pool, sink, complete }
    }
}

impl BufferHandler for EncoderOutputHandler {
    fn on_buffer(&self, port: &OutputPort, mut buffer: MediaBuffer) {
        let flags = buffer.flags();
        if !buffer.is_empty() {
            self.sink.write(&mut buffer);
        }
        self.pool.release(buffer);

        if port.is_enabled() {
            match self.pool.get() {
                Some(next) => {
                    if let Err(e) = port.send_buffer(next) {
                        warn!(port = %e.port, "Unable to return a buffer to the encoder port");
                        self.pool.release(e.buffer);
                    }
                }
                None => warn!(port = port.name(), "No idle buffer to return to the encoder port"),
            }
        }

        if flags.is_terminal() {
            if flags.contains(BufferFlags::TRANSMISSION_FAILED) {
                self.sink.mark_failed();
            }
            self.complete.post();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::core::signal::CompletionSignal;
    use crate::pipeline::port::PortShared;

    #[derive(Clone, Default)]
    struct Shared(Arc<StdMutex<Vec<u8>>>);

    impl io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl io::Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<BufferPool>, Arc<SinkSlot>, CompletionSignal, Arc<PortShared>, EncoderOutputHandler) {
        let pool = Arc::new(BufferPool::new(3, 8));
        let sink = Arc::new(SinkSlot::default());
        let signal = CompletionSignal::new();
        let shared = Arc::new(PortShared::new("encoder:out0".into()));
        let handler = EncoderOutputHandler::new(Arc::clone(&pool), Arc::clone(&sink), signal.poster());
        (pool, sink, signal, shared, handler)
    }

    fn filled(pool: &BufferPool, bytes: &[u8], flags: BufferFlags) -> MediaBuffer {
        let mut buffer = pool.get().unwrap();
        buffer.fill(bytes);
        buffer.set_flags(flags);
        buffer
    }

    #[test]
    fn test_reclaim_writes_and_resubmits() {
        let (pool, sink, signal, shared, handler) = setup();
        let out = Shared::default();
        sink.install(Box::new(out.clone()));
        shared.set_enabled(true);
        let port = OutputPort::new(Arc::clone(&shared));

        handler.on_buffer(&port, filled(&pool, b"abc", BufferFlags::NONE));
        assert!(!signal.is_posted());
        handler.on_buffer(&port, filled(&pool, b"def", BufferFlags::FRAME_END));
        assert!(signal.is_posted());

        assert_eq!(out.0.lock().unwrap().as_slice(), b"abcdef");
        assert_eq!(shared.queued(), 2);
        assert_eq!(pool.idle_len() + shared.queued(), 3);
        let status = sink.take().unwrap().close().unwrap();
        assert_eq!(status, FrameStatus { bytes: 6, failed: false });
    }

    #[test]
    fn test_stale_buffer_without_sink() {
        let (pool, sink, signal, shared, handler) = setup();
        let port = OutputPort::new(shared);
        handler.on_buffer(&port, filled(&pool, b"late", BufferFlags::FRAME_END));
        assert!(!sink.is_open());
        assert!(signal.is_posted());
        // Disabled port: nothing resubmitted, buffer back in the pool.
        assert_eq!(pool.idle_len(), 3);
    }

    #[test]
    fn test_failures_mark_frame() {
        let (pool, sink, signal, shared, handler) = setup();
        let port = OutputPort::new(shared);
        sink.install(Box::new(Broken));
        handler.on_buffer(&port, filled(&pool, b"x", BufferFlags::NONE));
        assert!(sink.take().unwrap().close().unwrap().failed);

        sink.install(Box::new(Shared::default()));
        handler.on_buffer(
            &port,
            filled(&pool, b"", BufferFlags::FRAME_END | BufferFlags::TRANSMISSION_FAILED),
        );
        assert!(signal.is_posted());
        assert!(sink.take().unwrap().close().unwrap().failed);
    }
}
