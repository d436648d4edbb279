//! Per-connection state: serialized writer, cancellation scope and heartbeat
//! bookkeeping.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wsrpc_core::{Codec, CodecError, Response};

use crate::transport::{Frame, FrameSink, TransportError};

/// Error writing to a connection. Every variant except `Encode` leaves the
/// connection cancelled.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection was already cancelled.
    #[error("connection closed")]
    Closed,
    /// The frame was not written within the write deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// The transport rejected the frame.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The response could not be encoded.
    #[error("encode response: {0}")]
    Encode(#[from] CodecError),
}

/// A connected peer.
pub struct Connection {
    id: String,
    sink: Mutex<Box<dyn FrameSink>>,
    cancel: CancellationToken,
    write_timeout: Duration,
    /// Millisecond timestamps, 0 when never observed.
    last_ping_sent: AtomicI64,
    last_pong: AtomicI64,
    closed: AtomicBool,
    connected_at: Instant,
}

impl Connection {
    /// Wrap `sink`. The connection's cancellation scope is a child of `parent`.
    pub fn new(
        sink: Box<dyn FrameSink>,
        write_timeout: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            sink: Mutex::new(sink),
            cancel: parent.child_token(),
            write_timeout,
            last_ping_sent: AtomicI64::new(0),
            last_pong: AtomicI64::new(0),
            closed: AtomicBool::new(false),
            connected_at: Instant::now(),
        }
    }

    /// Unique connection ID (UUID v7).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Write one frame.
    ///
    /// Writers are serialized; the send itself is bounded by the write
    /// deadline. Any failure cancels the connection.
    pub async fn write(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        let result = {
            let mut sink = self.sink.lock().await;
            tokio::time::timeout(self.write_timeout, sink.send_frame(frame)).await
        };
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!(conn_id = %self.id, error = %e, "write failed");
                self.cancel();
                Err(e.into())
            }
            Err(_elapsed) => {
                debug!(conn_id = %self.id, timeout = ?self.write_timeout, "write timed out");
                self.cancel();
                Err(ConnectionError::WriteTimeout(self.write_timeout))
            }
        }
    }

    /// Encode `response` with `codec` and write it as a data frame.
    pub async fn send_response(
        &self,
        codec: &dyn Codec,
        response: &Response,
    ) -> Result<(), ConnectionError> {
        let bytes = codec.encode_response(response)?;
        let frame = if codec.is_binary() {
            Frame::Binary(bytes.into())
        } else {
            Frame::Text(String::from_utf8(bytes).map_err(|e| CodecError::Utf8(e.utf8_error()))?)
        };
        self.write(frame).await
    }

    /// Cancel the connection scope. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection scope is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// A clone of the connection's cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel, then close the sink. Only the first call touches the sink.
    pub async fn close(&self) {
        self.cancel();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(self.write_timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(conn_id = %self.id, error = %e, "close failed"),
            Err(_) => debug!(conn_id = %self.id, "close timed out"),
        }
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record that a heartbeat ping carrying `ts` is being sent.
    pub fn record_ping_sent(&self, ts: i64) {
        self.last_ping_sent.store(ts, Ordering::Release);
    }

    /// Record a pong echoing `ts`. Older observations never replace newer ones.
    ///
    /// A pong can only acknowledge a ping already sent: `ts` is capped at the
    /// last ping timestamp, and pongs arriving before any ping are ignored.
    pub fn record_pong(&self, ts: i64) {
        let Some(ceiling) = self.last_ping_sent() else {
            debug!(conn_id = %self.id, ts, "pong before any ping ignored");
            return;
        };
        let _ = self.last_pong.fetch_max(ts.min(ceiling), Ordering::AcqRel);
    }

    /// Timestamp of the most recent ping sent.
    pub fn last_ping_sent(&self) -> Option<i64> {
        non_zero(self.last_ping_sent.load(Ordering::Acquire))
    }

    /// Newest pong timestamp observed.
    pub fn last_pong(&self) -> Option<i64> {
        non_zero(self.last_pong.load(Ordering::Acquire))
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

fn non_zero(ts: i64) -> Option<i64> {
    (ts != 0).then_some(ts)
}
