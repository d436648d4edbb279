//! # wsrpc-core
//!
//! Shared vocabulary for the wsrpc server and its clients:
//!
//! - **Envelopes**: [`Request`], [`Response`] and [`PingPong`] with the reserved
//!   status codes and method names
//! - **Codec**: the pluggable [`Codec`] trait and the default [`JsonCodec`]
//! - **Errors**: [`RpcError`] and the wire error codes reported to peers
//! - **Time**: millisecond timestamps used by the heartbeat protocol
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod logging;
pub mod time;
pub mod types;

pub use codec::{Codec, CodecError, JsonCodec};
pub use errors::RpcError;
pub use types::{ErrorBody, PingPong, Request, Response};
