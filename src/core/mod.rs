//! # Core Module
//!
//! Buffer economy primitives shared by the pipeline and the controller.
//!
//! - [`buffer_pool`]: fixed pool of payload buffers with FIFO reuse
//! - [`signal`]: one-shot frame completion signal

pub mod buffer_pool;
pub mod signal;

pub use buffer_pool::{BufferFlags, BufferMemory, BufferPool, MediaBuffer};
pub use signal::{CompletionSignal, SignalPoster};
