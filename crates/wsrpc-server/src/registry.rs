//! Method registry.
//!
//! Handlers are plain async functions of `(InvocationContext, Args)`. At
//! registration each is wrapped in a type-erased invoker that decodes the
//! argument payload into `Args` and encodes the result, so the dispatcher
//! never needs to know concrete types.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use wsrpc_core::RpcError;
use wsrpc_core::types::is_reserved;

use crate::context::InvocationContext;

/// How a handler delivers output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    /// One request, one response written by the dispatcher.
    Normal,
    /// The handler pushes output itself; the dispatcher only reports errors.
    Stream,
}

/// Error registering a handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A handler is already registered under this name.
    #[error("method '{0}' already registered")]
    Duplicate(String),
    /// The name is reserved for the heartbeat protocol.
    #[error("method name '{0}' is reserved")]
    Reserved(String),
    /// Method names must not be empty.
    #[error("method name must not be empty")]
    EmptyName,
}

/// Result of a successful invocation: `Some(value)` for Normal handlers,
/// `None` for Stream handlers.
pub type InvokeResult = Result<Option<Value>, RpcError>;

type Invoker = dyn Fn(InvocationContext, Value) -> BoxFuture<'static, InvokeResult> + Send + Sync;

/// A type-erased handler.
#[derive(Clone)]
pub struct Handler {
    kind: HandlerKind,
    arg_type: &'static str,
    invoker: Arc<Invoker>,
}

impl Handler {
    /// Wrap a request/response handler.
    pub fn normal<A, R, E, F, Fut>(f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(InvocationContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let f = Arc::new(f);
        let invoker = move |ctx: InvocationContext, args: Value| {
            let f = f.clone();
            async move {
                let args = decode_args::<A>(ctx.method(), args)?;
                let output = f(ctx, args).await.map_err(handler_error)?;
                serde_json::to_value(output)
                    .map(Some)
                    .map_err(|e| RpcError::Internal {
                        message: format!("failed to encode result: {e}"),
                    })
            }
            .boxed()
        };
        Self {
            kind: HandlerKind::Normal,
            arg_type: std::any::type_name::<A>(),
            invoker: Arc::new(invoker),
        }
    }

    /// Wrap a streaming handler that pushes through its context.
    pub fn stream<A, E, F, Fut>(f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(InvocationContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let f = Arc::new(f);
        let invoker = move |ctx: InvocationContext, args: Value| {
            let f = f.clone();
            async move {
                let args = decode_args::<A>(ctx.method(), args)?;
                f(ctx, args).await.map_err(handler_error)?;
                InvokeResult::Ok(None)
            }
            .boxed()
        };
        Self {
            kind: HandlerKind::Stream,
            arg_type: std::any::type_name::<A>(),
            invoker: Arc::new(invoker),
        }
    }

    /// Handler kind.
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Rust type name of the argument type.
    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }
}

fn decode_args<A: DeserializeOwned>(method: &str, args: Value) -> Result<A, RpcError> {
    let absent = args.is_null();
    let invalid = |e: serde_json::Error| RpcError::InvalidArgs {
        method: method.to_owned(),
        message: e.to_string(),
    };
    match serde_json::from_value(args) {
        Ok(args) => Ok(args),
        // Absent args also stand for an empty object, so structs with
        // defaulted fields accept a bare `{"method": ...}` request.
        Err(_) if absent => {
            serde_json::from_value(Value::Object(serde_json::Map::new())).map_err(invalid)
        }
        Err(e) => Err(invalid(e)),
    }
}

fn handler_error<E: Display>(e: E) -> RpcError {
    RpcError::Handler {
        message: e.to_string(),
    }
}

/// A registered method.
pub struct HandlerDescriptor {
    name: String,
    handler: Handler,
}

impl HandlerDescriptor {
    /// Method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handler kind.
    pub fn kind(&self) -> HandlerKind {
        self.handler.kind
    }

    /// Rust type name of the argument type.
    pub fn arg_type(&self) -> &'static str {
        self.handler.arg_type
    }

    /// Decode `args` into the handler's argument type and run it.
    pub fn invoke(&self, ctx: InvocationContext, args: Value) -> BoxFuture<'static, InvokeResult> {
        (self.handler.invoker)(ctx, args)
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("kind", &self.handler.kind)
            .field("arg_type", &self.handler.arg_type)
            .finish_non_exhaustive()
    }
}

/// Registry mapping method names to handlers.
///
/// Safe to register into and look up from concurrently. Entries are never
/// replaced once inserted.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: DashMap<String, Arc<HandlerDescriptor>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    pub fn register(&self, name: &str, handler: Handler) -> Result<(), RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if is_reserved(name) {
            return Err(RegistryError::Reserved(name.to_owned()));
        }
        match self.handlers.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(name.to_owned())),
            Entry::Vacant(slot) => {
                debug!(
                    method = name,
                    kind = ?handler.kind,
                    arg_type = handler.arg_type,
                    "registered handler"
                );
                let _ = slot.insert(Arc::new(HandlerDescriptor {
                    name: name.to_owned(),
                    handler,
                }));
                Ok(())
            }
        }
    }

    /// Register a request/response handler.
    pub fn register_normal<A, R, E, F, Fut>(&self, name: &str, f: F) -> Result<(), RegistryError>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(InvocationContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.register(name, Handler::normal(f))
    }

    /// Register a streaming handler.
    pub fn register_stream<A, E, F, Fut>(&self, name: &str, f: F) -> Result<(), RegistryError>
    where
        A: DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(InvocationContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.register(name, Handler::stream(f))
    }

    /// Find the handler for `name`.
    pub fn lookup(&self, name: &str) -> Result<Arc<HandlerDescriptor>, RpcError> {
        self.handlers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RpcError::HandlerNotFound {
                method: name.to_owned(),
            })
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
