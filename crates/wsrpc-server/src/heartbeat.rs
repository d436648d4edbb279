//! Heartbeat ping/pong liveness monitoring.
//!
//! The server pings every `interval` with the current time `T`; the peer
//! answers with a `pong` request echoing `T`. A peer whose newest echoed `T`
//! (or, before any pong, the first ping) is older than `pong_timeout` is
//! considered dead and the connection is closed.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};
use wsrpc_core::codec::encode_value;
use wsrpc_core::time::timestamp_ms;
use wsrpc_core::{Codec, PingPong, Response};

use crate::connection::Connection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped answering within the timeout window.
    TimedOut,
    /// A ping could not be written.
    WriteFailed,
    /// The connection was cancelled externally.
    Cancelled,
}

/// Epoch-millisecond clock driven by the Tokio timer, so ping timestamps stay
/// monotonic for the lifetime of one connection.
struct Clock {
    epoch_ms: i64,
    origin: Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            epoch_ms: timestamp_ms(),
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Run heartbeat pings for `connection` until it is cancelled or found dead.
///
/// The first tick fires one `interval` after start. On a dead peer the
/// connection is closed (close frame, then cancel) before returning.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    codec: Arc<dyn Codec>,
    interval: Duration,
    pong_timeout: Duration,
) -> HeartbeatResult {
    let clock = Clock::start();
    let timeout_ms = millis(pong_timeout);
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut first_ping: Option<i64> = None;

    loop {
        tokio::select! {
            () = connection.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {}
        }

        let now = clock.now_ms();
        if let Some(reference) = connection.last_pong().or(first_ping) {
            let silent_ms = now - reference;
            if silent_ms > timeout_ms {
                warn!(
                    conn_id = connection.id(),
                    silent_ms,
                    timeout_ms,
                    "peer stopped answering pings, closing"
                );
                counter!("heartbeat_timeouts_total").increment(1);
                connection.close().await;
                return HeartbeatResult::TimedOut;
            }
        }

        let data = match encode_value(&*codec, &PingPong { ts: now }) {
            Ok(data) => data,
            Err(e) => {
                error!(conn_id = connection.id(), error = %e, "failed to encode ping");
                connection.cancel();
                return HeartbeatResult::WriteFailed;
            }
        };
        // Recorded first so a fast pong always finds its ping.
        connection.record_ping_sent(now);
        if let Err(e) = connection.send_response(&*codec, &Response::ping(data)).await {
            debug!(conn_id = connection.id(), error = %e, "ping write failed");
            connection.cancel();
            return HeartbeatResult::WriteFailed;
        }
        let _ = first_ping.get_or_insert(now);
    }
}
