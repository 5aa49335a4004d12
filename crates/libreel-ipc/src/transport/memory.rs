//! In-process transport pair

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::{Frame, FrameSink, FrameSource, Transport};
use crate::error::RpcError;

/// One end of an in-memory channel pair
#[derive(Debug)]
pub struct MemoryTransport {
    sink: MemorySink,
    source: MemorySource,
}

#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<Frame>,
    closed: Arc<watch::Sender<bool>>,
}

#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Frame>,
    closed: watch::Receiver<bool>,
}

/// Create two connected ends
///
/// Frames posted on one end arrive at the other in order. Terminating
/// either end closes both.
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let closed = Arc::new(closed_tx);

    let a = MemoryTransport {
        sink: MemorySink {
            tx: b_tx,
            closed: closed.clone(),
        },
        source: MemorySource {
            rx: a_rx,
            closed: closed_rx.clone(),
        },
    };
    let b = MemoryTransport {
        sink: MemorySink { tx: a_tx, closed },
        source: MemorySource {
            rx: b_rx,
            closed: closed_rx,
        },
    };
    (a, b)
}

impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn split(self) -> (MemorySink, MemorySource) {
        (self.sink, self.source)
    }
}

impl FrameSink for MemorySink {
    fn post(&self, frame: Frame) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::TransportClosed);
        }
        self.tx.send(frame).map_err(|_| RpcError::TransportClosed)
    }

    fn terminate(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }
}

impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Frame> {
        let closed = *self.closed.borrow_and_update();
        if closed {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closed.changed() => None,
            frame = self.rx.recv() => frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_frames_cross_in_order() {
        let (a, b) = pair();
        let (a_sink, _a_source) = a.split();
        let (_b_sink, mut b_source) = b.split();

        a_sink.post(vec![1]).unwrap();
        a_sink.post(vec![2]).unwrap();
        assert_eq!(b_source.recv().await, Some(vec![1]));
        assert_eq!(b_source.recv().await, Some(vec![2]));
    }

    #[tokio::test]
    async fn test_terminate_wakes_both_ends() {
        let (a, b) = pair();
        let (a_sink, mut a_source) = a.split();
        let (b_sink, mut b_source) = b.split();

        let waiter = tokio::spawn(async move { b_source.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        a_sink.terminate();

        assert_eq!(waiter.await.unwrap(), None);
        assert_eq!(a_source.recv().await, None);
        assert!(b_sink.is_closed());
        assert!(matches!(b_sink.post(vec![1]), Err(RpcError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_dropped_peer_ends_stream() {
        let (a, b) = pair();
        let (_b_sink, mut b_source) = b.split();
        drop(a);
        assert_eq!(b_source.recv().await, None);
    }
}
