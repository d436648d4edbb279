//! Frame transport seam.
//!
//! Sessions and connections are written against [`FrameSource`] and
//! [`FrameSink`] rather than a concrete socket. The axum WebSocket halves
//! implement both; [`channel`] builds an in-memory pair for tests and
//! embedding.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// A single transport-level frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame.
    Binary(Bytes),
    /// Transport-level ping (not the RPC heartbeat).
    Ping(Bytes),
    /// Transport-level pong.
    Pong(Bytes),
    /// Close handshake.
    Close,
}

impl Frame {
    /// Payload bytes of a data frame, `None` for control frames.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Text(text) => Some(text.as_bytes()),
            Self::Binary(bytes) => Some(bytes),
            Self::Ping(_) | Self::Pong(_) | Self::Close => None,
        }
    }
}

/// Transport failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The other side is gone.
    #[error("transport closed")]
    Closed,
    /// Underlying socket error.
    #[error("transport error: {0}")]
    Io(String),
}

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one frame.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send a close frame (where the transport has one) and shut down.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a transport.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next inbound frame, `None` at end of stream.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

// ── axum WebSocket ──────────────────────────────────────────────────

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Ping(bytes) => Message::Ping(bytes),
            Frame::Pong(bytes) => Message::Pong(bytes),
            Frame::Close => Message::Close(None),
        };
        self.send(message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The peer may already be gone; closing the sink is what matters.
        let _ = self.send(Message::Close(None)).await;
        SinkExt::close(self)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl FrameSource for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        let message = match self.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
        };
        Some(Ok(match message {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(bytes) => Frame::Binary(bytes),
            Message::Ping(bytes) => Frame::Ping(bytes),
            Message::Pong(bytes) => Frame::Pong(bytes),
            Message::Close(_) => Frame::Close,
        }))
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// Sending end of an in-memory transport.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Frame>>,
}

/// Receiving end of an in-memory transport.
pub struct ChannelSource {
    rx: mpsc::Receiver<Frame>,
}

/// Build a connected in-memory sink/source pair holding up to `buffer` frames.
pub fn channel(buffer: usize) -> (ChannelSink, ChannelSource) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (ChannelSink { tx: Some(tx) }, ChannelSource { rx })
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Frame::Close).await;
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

impl ChannelSource {
    /// Non-blocking receive, for assertions in tests.
    pub fn try_next(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}
