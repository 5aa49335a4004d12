//! Message transports
//!
//! A transport is split into a [`FrameSink`] that can be shared between
//! tasks and a single [`FrameSource`]. Because only one source exists per
//! end, exactly one listener observes each inbound frame.

use std::future::Future;

use crate::error::RpcError;

pub mod memory;
pub mod stream;

pub use memory::{pair, MemorySink, MemorySource, MemoryTransport};
pub use stream::{StreamSink, StreamSource, StreamTransport};

/// One encoded envelope
pub type Frame = Vec<u8>;

/// Outbound half of a transport
pub trait FrameSink: Send + Sync + 'static {
    /// Queue a frame for delivery; fails once the transport is closed
    fn post(&self, frame: Frame) -> Result<(), RpcError>;

    /// Close the transport for both ends
    fn terminate(&self);

    fn is_closed(&self) -> bool;
}

/// Inbound half of a transport
pub trait FrameSource: Send + 'static {
    /// Next frame, or `None` once the transport is closed
    fn recv(&mut self) -> impl Future<Output = Option<Frame>> + Send;
}

/// A bidirectional channel that can be split into its two halves
pub trait Transport: Send + 'static {
    type Sink: FrameSink;
    type Source: FrameSource;

    fn split(self) -> (Self::Sink, Self::Source);
}
