//! Wire envelope types exchanged over a connection.
//!
//! `args` and `data` are opaque codec-encoded payloads; only the handler bound
//! to a method knows their shape.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── Reserved method names ───────────────────────────────────────────

/// Server → client heartbeat ping.
pub const METHOD_PING: &str = "ping";
/// Client → server heartbeat answer.
pub const METHOD_PONG: &str = "pong";

/// Whether `method` is reserved for the heartbeat protocol.
pub fn is_reserved(method: &str) -> bool {
    method == METHOD_PING || method == METHOD_PONG
}

// ── Response status codes ───────────────────────────────────────────

/// Successful call.
pub const STATUS_OK: i32 = 0;
/// Heartbeat ping.
pub const STATUS_PING: i32 = 1;
/// The inbound frame was not a valid request envelope.
pub const STATUS_MALFORMED_REQUEST: i32 = 2;
/// No handler is registered for the method.
pub const STATUS_METHOD_NOT_FOUND: i32 = 3;
/// The argument payload did not match the handler's argument type.
pub const STATUS_INVALID_ARGS: i32 = 4;
/// The handler returned an error.
pub const STATUS_HANDLER_ERROR: i32 = 5;
/// The request could not be scheduled before the submit timeout.
pub const STATUS_POOL_SATURATED: i32 = 6;
/// Unexpected server-side failure.
pub const STATUS_INTERNAL_ERROR: i32 = 7;

/// Inbound call from a client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    /// Method name selecting the handler.
    pub method: String,
    /// Caller-assigned correlation id, echoed in the response.
    pub client_id: Option<i64>,
    /// Codec-encoded argument payload (empty when absent).
    pub args: Bytes,
}

impl Request {
    /// Create a request with no arguments and no correlation id.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            client_id: None,
            args: Bytes::new(),
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: i64) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Attach an encoded argument payload.
    #[must_use]
    pub fn with_args(mut self, args: impl Into<Bytes>) -> Self {
        self.args = args.into();
        self
    }
}

/// Outbound message to a client: call results, pushes, pings and errors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// `0` on success, see the `STATUS_*` constants otherwise.
    pub status: i32,
    /// Correlation id echoed from the request.
    pub client_id: Option<i64>,
    /// Method echoed from the request (or `ping`).
    pub method: String,
    /// Codec-encoded result payload (empty when absent).
    pub data: Bytes,
}

impl Response {
    /// Build a success response.
    pub fn success(method: impl Into<String>, client_id: Option<i64>, data: Bytes) -> Self {
        Self {
            status: STATUS_OK,
            client_id,
            method: method.into(),
            data,
        }
    }

    /// Build an error response carrying an encoded [`ErrorBody`].
    pub fn error(
        method: impl Into<String>,
        client_id: Option<i64>,
        status: i32,
        data: Bytes,
    ) -> Self {
        Self {
            status,
            client_id,
            method: method.into(),
            data,
        }
    }

    /// Build a heartbeat ping carrying an encoded [`PingPong`].
    pub fn ping(data: Bytes) -> Self {
        Self {
            status: STATUS_PING,
            client_id: None,
            method: METHOD_PING.to_owned(),
            data,
        }
    }

    /// Whether this is a successful call result or push.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Heartbeat payload: milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPong {
    /// Timestamp in milliseconds.
    pub ts: i64,
}

/// Structured error payload carried in the `data` of an error response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. `METHOD_NOT_FOUND`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_methods() {
        assert!(is_reserved("ping"));
        assert!(is_reserved("pong"));
        assert!(!is_reserved("hello"));
        assert!(!is_reserved("Ping"));
    }

    #[test]
    fn request_builder() {
        let req = Request::new("hello")
            .with_client_id(7)
            .with_args(&b"{\"Name\":\"world\"}"[..]);
        assert_eq!(req.method, "hello");
        assert_eq!(req.client_id, Some(7));
        assert_eq!(&req.args[..], b"{\"Name\":\"world\"}");
    }

    #[test]
    fn success_response_is_success() {
        let resp = Response::success("hello", Some(1), Bytes::from_static(b"\"hi\""));
        assert!(resp.is_success());
        assert_eq!(resp.status, STATUS_OK);
        assert_eq!(resp.client_id, Some(1));
    }

    #[test]
    fn ping_response_shape() {
        let resp = Response::ping(Bytes::from_static(b"{\"ts\":5}"));
        assert_eq!(resp.status, STATUS_PING);
        assert_eq!(resp.method, METHOD_PING);
        assert!(resp.client_id.is_none());
        assert!(!resp.is_success());
    }

    #[test]
    fn error_statuses_are_distinct_and_nonzero() {
        let statuses = [
            STATUS_PING,
            STATUS_MALFORMED_REQUEST,
            STATUS_METHOD_NOT_FOUND,
            STATUS_INVALID_ARGS,
            STATUS_HANDLER_ERROR,
            STATUS_POOL_SATURATED,
            STATUS_INTERNAL_ERROR,
        ];
        for (i, a) in statuses.iter().enumerate() {
            assert_ne!(*a, STATUS_OK);
            for b in &statuses[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn ping_pong_serde() {
        let pp: PingPong = serde_json::from_str(r#"{"ts":1700000000000}"#).unwrap();
        assert_eq!(pp.ts, 1_700_000_000_000);
        assert_eq!(serde_json::to_string(&pp).unwrap(), r#"{"ts":1700000000000}"#);
    }
}
