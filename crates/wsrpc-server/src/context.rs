//! Capability handed to every handler invocation.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use wsrpc_core::codec::encode_value;
use wsrpc_core::{Codec, Response};

use crate::connection::{Connection, ConnectionError};

/// Per-invocation context: the owning connection, its cancellation scope and
/// the request's routing fields.
#[derive(Clone)]
pub struct InvocationContext {
    connection: Arc<Connection>,
    codec: Arc<dyn Codec>,
    method: Arc<str>,
    client_id: Option<i64>,
}

impl InvocationContext {
    /// Build a context for a call of `method` on `connection`.
    pub fn new(
        connection: Arc<Connection>,
        codec: Arc<dyn Codec>,
        method: impl Into<Arc<str>>,
        client_id: Option<i64>,
    ) -> Self {
        Self {
            connection,
            codec,
            method: method.into(),
            client_id,
        }
    }

    /// The connection the request arrived on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Codec used by the connection.
    pub fn codec(&self) -> &dyn Codec {
        &*self.codec
    }

    /// Method being invoked.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Correlation id of the request, if the caller sent one.
    pub fn client_id(&self) -> Option<i64> {
        self.client_id
    }

    /// The connection's cancellation token. Long-running handlers should
    /// stop once it fires.
    pub fn cancel_token(&self) -> CancellationToken {
        self.connection.cancel_token()
    }

    /// Whether the connection has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.connection.is_cancelled()
    }

    /// Resolves when the connection is cancelled.
    pub async fn cancelled(&self) {
        self.connection.cancelled().await;
    }

    /// Push `value` to the peer as a success response tagged with this
    /// request's method and client id.
    pub async fn push<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), ConnectionError> {
        let data = encode_value(&*self.codec, value)?;
        let response = Response::success(&*self.method, self.client_id, data);
        self.connection.send_response(&*self.codec, &response).await
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("conn_id", &self.connection.id())
            .field("method", &self.method)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
