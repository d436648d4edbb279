//! Connection lifecycle: from accept through the read loop to teardown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::time;
use tracing::{info, instrument, trace};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::transport::{Frame, FrameSource};

/// Timing knobs for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    /// Deadline for the next inbound frame.
    pub read_timeout: Duration,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Pong staleness threshold.
    pub pong_timeout: Duration,
}

impl SessionSettings {
    /// Take the session timings from a server config.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            pong_timeout: config.pong_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame.
    PeerClosed,
    /// The transport ended without a close frame.
    EndOfStream,
    /// No frame arrived within the read deadline.
    ReadTimeout,
    /// The heartbeat declared the peer dead.
    HeartbeatTimeout,
    /// A read failed.
    Transport(String),
    /// The connection was cancelled (server shutdown or failed write).
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::EndOfStream => f.write_str("end of stream"),
            Self::ReadTimeout => f.write_str("read timeout"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Serve one connection until it closes.
///
/// 1. Starts the heartbeat monitor
/// 2. Reads frames under the read deadline and hands data frames to the
///    dispatcher
/// 3. On exit cancels the connection scope, closes the sink once and logs why
#[instrument(skip_all, fields(conn_id = %connection.id()))]
pub async fn run_session<S: FrameSource>(
    connection: Arc<Connection>,
    mut source: S,
    dispatcher: Dispatcher,
    settings: SessionSettings,
) -> CloseReason {
    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let heartbeat = tokio::spawn(run_heartbeat(
        connection.clone(),
        dispatcher.codec().clone(),
        settings.heartbeat_interval,
        settings.pong_timeout,
    ));

    let mut reason = loop {
        let next = tokio::select! {
            () = connection.cancelled() => break CloseReason::Cancelled,
            next = time::timeout(settings.read_timeout, source.next_frame()) => next,
        };
        let frame = match next {
            Err(_elapsed) => break CloseReason::ReadTimeout,
            Ok(None) => break CloseReason::EndOfStream,
            Ok(Some(Err(e))) => break CloseReason::Transport(e.to_string()),
            Ok(Some(Ok(frame))) => frame,
        };
        match frame {
            Frame::Text(text) => dispatcher.handle_frame(&connection, text.as_bytes()).await,
            Frame::Binary(bytes) => dispatcher.handle_frame(&connection, &bytes).await,
            Frame::Ping(_) | Frame::Pong(_) => trace!("transport control frame"),
            Frame::Close => break CloseReason::PeerClosed,
        }
    };

    connection.close().await;
    if let Ok(HeartbeatResult::TimedOut) = heartbeat.await {
        if reason == CloseReason::Cancelled {
            reason = CloseReason::HeartbeatTimeout;
        }
    }

    info!(reason = %reason, "client disconnected");
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection.age().as_secs_f64());
    reason
}
