//! # wsrpc-server
//!
//! Bidirectional RPC over WebSocket.
//!
//! - Handler registry: typed `Normal` (request/response) and `Stream`
//!   (handler-driven pushes) handlers keyed by method name
//! - Bounded worker pool with submit timeout and panic isolation
//! - Per-connection state: serialized writer with write deadline, cancellation
//!   scope, ping/pong bookkeeping
//! - Session read loop, dispatcher and heartbeat monitor
//! - Axum front end with `/health` and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod context;
pub mod dispatcher;
pub mod health;
pub mod heartbeat;
pub mod pool;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use config::{ConfigError, ServerConfig};
pub use connection::{Connection, ConnectionError};
pub use context::InvocationContext;
pub use dispatcher::Dispatcher;
pub use pool::{PoolError, WorkerPool};
pub use registry::{Handler, HandlerKind, MethodRegistry, RegistryError};
pub use server::{RpcServer, ServerError};
pub use shutdown::ShutdownCoordinator;
