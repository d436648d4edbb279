//! Per-request error type and the wire error codes reported to peers.

use crate::types::{
    ErrorBody, STATUS_HANDLER_ERROR, STATUS_INTERNAL_ERROR, STATUS_INVALID_ARGS,
    STATUS_MALFORMED_REQUEST, STATUS_METHOD_NOT_FOUND, STATUS_POOL_SATURATED,
};

// ── Error code constants ────────────────────────────────────────────

/// The inbound frame could not be decoded as a request envelope.
pub const MALFORMED_REQUEST: &str = "MALFORMED_REQUEST";
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
/// Argument payload does not match the handler's argument type.
pub const INVALID_ARGS: &str = "INVALID_ARGS";
/// The handler returned an error.
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
/// The worker pool did not accept the request in time.
pub const POOL_SATURATED: &str = "POOL_SATURATED";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Error produced while serving a single request.
///
/// None of these are connection-fatal: the dispatcher reports them to the
/// peer as an error response and keeps the connection open.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The frame was not a valid request envelope.
    #[error("malformed request: {message}")]
    MalformedRequest {
        /// Decoder error text.
        message: String,
    },

    /// No handler registered under this name.
    #[error("method '{method}' not found")]
    HandlerNotFound {
        /// Requested method name.
        method: String,
    },

    /// Arguments failed to decode into the handler's argument type.
    #[error("invalid arguments for '{method}': {message}")]
    InvalidArgs {
        /// Method being called.
        method: String,
        /// Decoder error text.
        message: String,
    },

    /// The handler itself failed.
    #[error("{message}")]
    Handler {
        /// Handler error text.
        message: String,
    },

    /// The request could not be scheduled on the worker pool.
    #[error("worker pool saturated, request not scheduled")]
    PoolSaturated,

    /// Unexpected server-side failure.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } => MALFORMED_REQUEST,
            Self::HandlerNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidArgs { .. } => INVALID_ARGS,
            Self::Handler { .. } => HANDLER_ERROR,
            Self::PoolSaturated => POOL_SATURATED,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Response status for this variant.
    pub fn status(&self) -> i32 {
        match self {
            Self::MalformedRequest { .. } => STATUS_MALFORMED_REQUEST,
            Self::HandlerNotFound { .. } => STATUS_METHOD_NOT_FOUND,
            Self::InvalidArgs { .. } => STATUS_INVALID_ARGS,
            Self::Handler { .. } => STATUS_HANDLER_ERROR,
            Self::PoolSaturated => STATUS_POOL_SATURATED,
            Self::Internal { .. } => STATUS_INTERNAL_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_code_and_message() {
        let err = RpcError::HandlerNotFound {
            method: "no.such".into(),
        };
        assert_eq!(err.code(), METHOD_NOT_FOUND);
        assert_eq!(err.status(), STATUS_METHOD_NOT_FOUND);
        assert!(err.to_string().contains("no.such"));
    }

    #[test]
    fn invalid_args_code() {
        let err = RpcError::InvalidArgs {
            method: "hello".into(),
            message: "expected struct".into(),
        };
        assert_eq!(err.code(), INVALID_ARGS);
        assert_eq!(err.status(), STATUS_INVALID_ARGS);
    }

    #[test]
    fn handler_error_body() {
        let err = RpcError::Handler {
            message: "boom".into(),
        };
        let body = err.to_error_body();
        assert_eq!(body.code, HANDLER_ERROR);
        assert_eq!(body.message, "boom");
    }

    #[test]
    fn pool_saturated_status() {
        let err = RpcError::PoolSaturated;
        assert_eq!(err.code(), POOL_SATURATED);
        assert_eq!(err.status(), STATUS_POOL_SATURATED);
    }

    #[test]
    fn malformed_and_internal_codes() {
        let malformed = RpcError::MalformedRequest {
            message: "eof".into(),
        };
        assert_eq!(malformed.code(), MALFORMED_REQUEST);
        assert_eq!(malformed.status(), STATUS_MALFORMED_REQUEST);

        let internal = RpcError::Internal {
            message: "nope".into(),
        };
        assert_eq!(internal.code(), INTERNAL_ERROR);
        assert_eq!(internal.status(), STATUS_INTERNAL_ERROR);
    }
}
