//! Request dispatch: decode the envelope, route pongs inline, run everything
//! else on the worker pool and report failures to the peer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use tracing::{debug, error, instrument, trace, warn};
use wsrpc_core::codec::{decode_value, encode_value};
use wsrpc_core::types::METHOD_PONG;
use wsrpc_core::{Codec, PingPong, Request, Response, RpcError};

use crate::connection::Connection;
use crate::context::InvocationContext;
use crate::pool::{PoolError, WorkerPool, panic_message};
use crate::registry::{HandlerKind, MethodRegistry};

/// Normal handlers running at least this long are logged.
const SLOW_HANDLER: Duration = Duration::from_secs(5);

/// Routes inbound frames to handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    pool: Arc<WorkerPool>,
    codec: Arc<dyn Codec>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`, running handlers on `pool`.
    pub fn new(registry: Arc<MethodRegistry>, pool: Arc<WorkerPool>, codec: Arc<dyn Codec>) -> Self {
        Self {
            registry,
            pool,
            codec,
        }
    }

    /// The handler registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// The worker pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The envelope codec.
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Handle one inbound data frame from `connection`.
    ///
    /// Returns once the request is queued (or answered with an error). Only
    /// waits for the pool, never for the handler.
    #[instrument(skip_all, fields(conn_id = connection.id()))]
    pub async fn handle_frame(&self, connection: &Arc<Connection>, frame: &[u8]) {
        let request = match self.codec.decode_request(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "malformed request");
                let err = RpcError::MalformedRequest {
                    message: e.to_string(),
                };
                self.reply_error(connection, "", None, &err).await;
                return;
            }
        };

        if request.method == METHOD_PONG {
            self.record_pong(connection, &request);
            return;
        }

        counter!("rpc_requests_total", "method" => request.method.clone()).increment(1);
        let method = request.method.clone();
        let client_id = request.client_id;
        debug!(method, ?client_id, "dispatching request");

        let task = self.clone().execute(connection.clone(), request);
        if let Err(e) = self.pool.submit(task).await {
            let err = match e {
                PoolError::Saturated(_) => RpcError::PoolSaturated,
                PoolError::Closed => RpcError::Internal {
                    message: "server is shutting down".into(),
                },
            };
            self.reply_error(connection, &method, client_id, &err).await;
        }
    }

    fn record_pong(&self, connection: &Connection, request: &Request) {
        match decode_value::<PingPong>(&*self.codec, &request.args) {
            Ok(pong) => {
                trace!(ts = pong.ts, "pong received");
                connection.record_pong(pong.ts);
            }
            Err(e) => warn!(error = %e, "malformed pong ignored"),
        }
    }

    /// Runs on a pool executor.
    async fn execute(self, connection: Arc<Connection>, request: Request) {
        let Request {
            method,
            client_id,
            args,
        } = request;

        if connection.is_cancelled() {
            trace!(conn_id = connection.id(), method, "connection gone, skipping request");
            return;
        }

        let descriptor = match self.registry.lookup(&method) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(conn_id = connection.id(), method, "unknown method");
                self.reply_error(&connection, &method, client_id, &err).await;
                return;
            }
        };

        let args = match self.codec.decode_payload(&args) {
            Ok(args) => args,
            Err(e) => {
                let err = RpcError::InvalidArgs {
                    method: method.clone(),
                    message: e.to_string(),
                };
                self.reply_error(&connection, &method, client_id, &err).await;
                return;
            }
        };

        let ctx = InvocationContext::new(
            connection.clone(),
            self.codec.clone(),
            method.as_str(),
            client_id,
        );
        let start = Instant::now();
        let result = match AssertUnwindSafe(descriptor.invoke(ctx, args))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&*panic);
                counter!("pool_task_panics_total").increment(1);
                error!(conn_id = connection.id(), method, panic = %message, "handler panicked");
                Err(RpcError::Internal {
                    message: format!("handler panicked: {message}"),
                })
            }
        };

        let elapsed = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => method.clone())
            .record(elapsed.as_secs_f64());
        if descriptor.kind() == HandlerKind::Normal && elapsed >= SLOW_HANDLER {
            warn!(
                method,
                duration_secs = elapsed.as_secs_f64(),
                "slow RPC request"
            );
        }

        match result {
            Ok(Some(value)) => {
                let data = match self.codec.encode_payload(&value) {
                    Ok(data) => data,
                    Err(e) => {
                        let err = RpcError::Internal {
                            message: format!("failed to encode result: {e}"),
                        };
                        self.reply_error(&connection, &method, client_id, &err).await;
                        return;
                    }
                };
                let response = Response::success(method.as_str(), client_id, data);
                if let Err(e) = connection.send_response(&*self.codec, &response).await {
                    debug!(conn_id = connection.id(), method, error = %e, "response not delivered");
                }
            }
            Ok(None) => trace!(method, "stream handler finished"),
            Err(err) => {
                if matches!(err, RpcError::Handler { .. }) {
                    debug!(conn_id = connection.id(), method, error = %err, "handler failed");
                }
                self.reply_error(&connection, &method, client_id, &err).await;
            }
        }
    }

    async fn reply_error(
        &self,
        connection: &Connection,
        method: &str,
        client_id: Option<i64>,
        err: &RpcError,
    ) {
        counter!(
            "rpc_errors_total",
            "method" => method.to_owned(),
            "error_type" => err.code()
        )
        .increment(1);

        let data = match encode_value(&*self.codec, &err.to_error_body()) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "failed to encode error body");
                return;
            }
        };
        let response = Response::error(method, client_id, err.status(), data);
        if let Err(e) = connection.send_response(&*self.codec, &response).await {
            debug!(conn_id = connection.id(), method, error = %e, "error response not delivered");
        }
    }
}
