//! Transport collaborator: frame-level read and write halves.
//!
//! The hub never touches a socket directly. A connection is handed over
//! as a [`FrameSink`] (write half) and a [`FrameStream`] (read half).
//! The sink is not required to tolerate concurrent writers; every
//! [`super::session::Session`] serializes writes through its own send
//! lock.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsFrame, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::error::TransportError;

/// One data frame read from or written to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Returns the raw payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Returns the payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the frame could not be written.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Closes the write half. Closing twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the close handshake failed.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Waits for the next data frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when the peer closed the
    /// connection and [`TransportError::Io`] on any other failure. Either
    /// error ends the session.
    async fn next_frame(&mut self) -> Result<Frame, TransportError>;
}

/// Write half of an axum [`WebSocket`].
#[derive(Debug)]
pub struct AxumSink(SplitSink<WebSocket, WsFrame>);

/// Read half of an axum [`WebSocket`].
#[derive(Debug)]
pub struct AxumStream(SplitStream<WebSocket>);

/// Splits an upgraded axum socket into hub transport halves.
#[must_use]
pub fn split_axum(socket: WebSocket) -> (AxumSink, AxumStream) {
    let (tx, rx) = socket.split();
    (AxumSink(tx), AxumStream(rx))
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(text) => WsFrame::text(text),
            Frame::Binary(bytes) => WsFrame::binary(bytes),
        };
        self.0
            .send(msg)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl FrameStream for AxumStream {
    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.0.next().await {
                Some(Ok(WsFrame::Text(text))) => return Ok(Frame::Text(text.as_str().to_owned())),
                Some(Ok(WsFrame::Binary(bytes))) => return Ok(Frame::Binary(bytes.to_vec())),
                // axum answers protocol pings itself
                Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => {}
                Some(Ok(WsFrame::Close(_))) | None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}

/// In-process transport built on bounded channels.
///
/// Useful for embedding the hub behind a non-WebSocket carrier and for
/// driving sessions in tests without opening sockets.
pub mod memory {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{Frame, FrameSink, FrameStream};
    use crate::error::TransportError;

    /// Hub-side write half; frames arrive at [`MemoryPeer::recv`].
    #[derive(Debug)]
    pub struct MemorySink {
        tx: Option<mpsc::Sender<Frame>>,
    }

    /// Hub-side read half; frames come from [`MemoryPeer::send`].
    #[derive(Debug)]
    pub struct MemoryStream {
        rx: mpsc::Receiver<Frame>,
    }

    /// The remote end of an in-memory connection.
    #[derive(Debug)]
    pub struct MemoryPeer {
        inbound: Option<mpsc::Sender<Frame>>,
        outbound: mpsc::Receiver<Frame>,
    }

    /// Creates a connected sink/stream pair plus the peer that drives it.
    ///
    /// `capacity` bounds both directions.
    #[must_use]
    pub fn pair(capacity: usize) -> (MemorySink, MemoryStream, MemoryPeer) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            MemorySink { tx: Some(out_tx) },
            MemoryStream { rx: in_rx },
            MemoryPeer {
                inbound: Some(in_tx),
                outbound: out_rx,
            },
        )
    }

    impl MemoryPeer {
        /// Delivers a frame to the hub's read half.
        ///
        /// # Errors
        ///
        /// Returns [`TransportError::Closed`] if the hub side is gone or the
        /// peer already hung up.
        pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
            let Some(tx) = &self.inbound else {
                return Err(TransportError::Closed);
            };
            tx.send(frame).await.map_err(|_| TransportError::Closed)
        }

        /// Delivers a text frame to the hub's read half.
        ///
        /// # Errors
        ///
        /// See [`MemoryPeer::send`].
        pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
            self.send(Frame::Text(text.into())).await
        }

        /// Waits for the next frame written by the hub.
        ///
        /// Returns `None` once the hub closed its write half.
        pub async fn recv(&mut self) -> Option<Frame> {
            self.outbound.recv().await
        }

        /// Returns a frame written by the hub, if one is already queued.
        pub fn try_recv(&mut self) -> Option<Frame> {
            self.outbound.try_recv().ok()
        }

        /// Hangs up: the hub's next read fails with [`TransportError::Closed`].
        pub fn hang_up(&mut self) {
            self.inbound = None;
        }
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
            let Some(tx) = &self.tx else {
                return Err(TransportError::Closed);
            };
            tx.send(frame).await.map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.tx = None;
            Ok(())
        }
    }

    #[async_trait]
    impl FrameStream for MemoryStream {
        async fn next_frame(&mut self) -> Result<Frame, TransportError> {
            self.rx.recv().await.ok_or(TransportError::Closed)
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::memory;
    use super::*;

    #[test]
    fn frame_bytes_and_len() {
        let text = Frame::Text("héllo".to_string());
        assert_eq!(text.len(), 6);
        assert!(!text.is_empty());
        let empty = Frame::Binary(Vec::new());
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn memory_pair_carries_frames_both_ways() {
        let (mut sink, mut stream, mut peer) = memory::pair(4);

        let sent = peer.send_text("in").await;
        assert!(sent.is_ok());
        let Ok(frame) = stream.next_frame().await else {
            panic!("expected inbound frame");
        };
        assert_eq!(frame, Frame::Text("in".to_string()));

        let written = sink.send_frame(Frame::Text("out".to_string())).await;
        assert!(written.is_ok());
        assert_eq!(peer.recv().await, Some(Frame::Text("out".to_string())));
    }

    #[tokio::test]
    async fn hang_up_closes_stream() {
        let (_sink, mut stream, mut peer) = memory::pair(4);
        peer.hang_up();
        assert_eq!(stream.next_frame().await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn closed_sink_rejects_writes() {
        let (mut sink, _stream, mut peer) = memory::pair(4);
        assert!(sink.close().await.is_ok());
        let result = sink.send_frame(Frame::Text("late".to_string())).await;
        assert_eq!(result, Err(TransportError::Closed));
        assert_eq!(peer.recv().await, None);
    }
}
