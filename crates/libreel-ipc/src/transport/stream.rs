//! Length-prefixed frames over a byte stream
//!
//! Wire format: 4-byte big-endian length, then the payload. Zero-length and
//! oversized frames end the stream. Writes happen on a dedicated task so
//! `post` never waits on the socket.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{Frame, FrameSink, FrameSource, Transport};
use crate::error::RpcError;
use crate::{LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};

/// Transport over any async byte stream (TCP socket, duplex pipe)
pub struct StreamTransport<S> {
    io: S,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(io: S) -> Self {
        Self { io }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSink {
    tx: mpsc::UnboundedSender<Frame>,
    closed: Arc<watch::Sender<bool>>,
}

pub struct StreamSource<S> {
    reader: ReadHalf<S>,
    closed: Arc<watch::Sender<bool>>,
    watch: watch::Receiver<bool>,
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Sink = StreamSink;
    type Source = StreamSource<S>;

    /// Split into halves, spawning the writer task
    ///
    /// Must be called from within a tokio runtime.
    fn split(self) -> (StreamSink, StreamSource<S>) {
        let (reader, writer) = tokio::io::split(self.io);
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, watch) = watch::channel(false);
        let closed = Arc::new(closed_tx);

        tokio::spawn(write_loop(writer, rx, closed.clone()));

        (
            StreamSink {
                tx,
                closed: closed.clone(),
            },
            StreamSource {
                reader,
                closed,
                watch,
            },
        )
    }
}

impl FrameSink for StreamSink {
    fn post(&self, frame: Frame) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::TransportClosed);
        }
        check_len(frame.len())?;
        self.tx.send(frame).map_err(|_| RpcError::TransportClosed)
    }

    fn terminate(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }
}

impl<S> FrameSource for StreamSource<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn recv(&mut self) -> Option<Frame> {
        let closed = *self.watch.borrow_and_update();
        if closed {
            return None;
        }
        let result = tokio::select! {
            biased;
            _ = self.watch.changed() => return None,
            result = read_frame(&mut self.reader) => result,
        };
        match result {
            Ok(frame) => Some(frame),
            Err(RpcError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("stream transport reached end of stream");
                self.closed.send_replace(true);
                None
            }
            Err(e) => {
                warn!(error = %e, "stream transport read failed");
                self.closed.send_replace(true);
                None
            }
        }
    }
}

fn check_len(len: usize) -> Result<(), RpcError> {
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(RpcError::Codec(format!(
            "frame length {} outside 1..={}",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

/// Read one length-prefixed frame
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, RpcError> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix).await?;
    let len = u32::from_be_bytes(prefix) as usize;
    check_len(len)?;

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

/// Write one length-prefixed frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<(), RpcError> {
    check_len(frame.len())?;
    writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<watch::Sender<bool>>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut watch = closed.subscribe();
    loop {
        let terminated = *watch.borrow_and_update();
        if terminated {
            // Flush frames queued before termination
            while let Ok(frame) = rx.try_recv() {
                if write_frame(&mut writer, &frame).await.is_err() {
                    break;
                }
            }
            break;
        }

        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        warn!(error = %e, "stream transport write failed");
                        break;
                    }
                }
                None => break,
            },
            _ = watch.changed() => {}
        }
    }

    closed.send_replace(true);
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "stream transport shutdown failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (left, right) = tokio::io::duplex(1024);
        let (left_sink, _left_source) = StreamTransport::new(left).split();
        let (_right_sink, mut right_source) = StreamTransport::new(right).split();

        left_sink.post(b"one".to_vec()).unwrap();
        left_sink.post(b"two".to_vec()).unwrap();
        assert_eq!(right_source.recv().await, Some(b"one".to_vec()));
        assert_eq!(right_source.recv().await, Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_terminate_closes_peer() {
        let (left, right) = tokio::io::duplex(1024);
        let (left_sink, _left_source) = StreamTransport::new(left).split();
        let (right_sink, mut right_source) = StreamTransport::new(right).split();

        left_sink.post(b"last".to_vec()).unwrap();
        left_sink.terminate();

        assert_eq!(right_source.recv().await, Some(b"last".to_vec()));
        assert_eq!(right_source.recv().await, None);
        assert!(right_sink.is_closed());
    }

    #[tokio::test]
    async fn test_rejects_empty_frame() {
        let (left, _right) = tokio::io::duplex(64);
        let (sink, _source) = StreamTransport::new(left).split();
        assert!(matches!(sink.post(Vec::new()), Err(RpcError::Codec(_))));
    }

    #[tokio::test]
    async fn test_oversized_prefix_ends_stream() {
        let (mut raw, right) = tokio::io::duplex(64);
        let (_sink, mut source) = StreamTransport::new(right).split();

        raw.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert_eq!(source.recv().await, None);
    }
}
