//! Preview renderer attached to the source preview port.
//!
//! The preview node always exists. With preview disabled it wraps a null sink
//! that is never connected, so teardown does not need a special case.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::config::PreviewConfig;
use crate::pipeline::stage::{Frame, FrameSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    Renderer,
    NullSink,
}

#[derive(Debug)]
pub struct PreviewRenderer {
    kind: PreviewKind,
    config: PreviewConfig,
    frames: AtomicU64,
}

impl PreviewRenderer {
    pub fn new(config: &PreviewConfig) -> Self {
        let kind = if config.want_preview {
            PreviewKind::Renderer
        } else {
            PreviewKind::NullSink
        };
        Self {
            kind,
            config: config.clone(),
            frames: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> PreviewKind {
        self.kind
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl FrameSink for PreviewRenderer {
    fn push(&self, frame: Frame) {
        match frame {
            Frame::Preview(preview) => {
                self.frames.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = preview.sequence, kind = ?self.kind, "Preview frame");
            }
            other => trace!(frame = other.kind(), "Preview ignores frame"),
        }
    }
}
