//! RPC server
//!
//! The serve loop decodes inbound frames and hands each call to its own
//! task, so a slow handler never holds up other calls. Every decoded call
//! gets exactly one reply: a result, a validation error, an unhandled-method
//! error, or a handler failure (including a panic inside the handler).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ciborium::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::codec::{self, CallEnvelope, Decoded, ErrorCode, ReplyError};
use crate::schema::{Method, SchemaRegistry};
use crate::transport::{FrameSink, FrameSource, Transport};

/// Boxed future returned by a handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

type Handler = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Failure reported by a domain handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Reply code; domain handlers always report `HandlerFailure`
    pub code: ErrorCode,
    /// Machine-readable domain code, relayed to the caller
    pub detail: Option<String>,
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::relayed(ErrorCode::HandlerFailure, None, message)
    }

    pub fn with_detail(detail: impl Into<String>, message: impl Into<String>) -> Self {
        Self::relayed(ErrorCode::HandlerFailure, Some(detail.into()), message)
    }

    /// Error received from another server, replied with its original code
    pub fn relayed(code: ErrorCode, detail: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            detail,
            message: message.into(),
        }
    }
}

/// Method to handler map
///
/// Handlers receive arguments already validated and normalized by the
/// schema registry: one value per parameter slot.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<Method, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `method`
    pub fn register<F, Fut>(&mut self, method: Method, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args: Vec<Value>| -> HandlerFuture { Box::pin(handler(args)) });
        self.handlers.insert(method, handler);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F, Fut>(mut self, method: Method, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(method, handler);
        self
    }

    pub fn contains(&self, method: Method) -> bool {
        self.handlers.contains_key(&method)
    }

    pub fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn get(&self, method: Method) -> Option<Handler> {
        self.handlers.get(&method).cloned()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods().collect();
        methods.sort();
        f.debug_struct("HandlerTable").field("methods", &methods).finish()
    }
}

/// Counters reported when a serve loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub calls: u64,
    pub malformed: u64,
}

/// Handle to a running serve loop
pub struct ServerHandle {
    sink: Arc<dyn FrameSink>,
    task: JoinHandle<ServeStats>,
}

impl ServerHandle {
    /// Close the transport; the serve loop ends once it notices
    pub fn terminate(&self) {
        self.sink.terminate();
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Wait for the serve loop to finish
    pub async fn join(self) -> ServeStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "serve loop aborted");
                ServeStats::default()
            }
        }
    }
}

/// Serve `table` over `transport` until the transport closes
///
/// Must be called from within a tokio runtime.
pub fn serve<T: Transport>(transport: T, table: HandlerTable) -> ServerHandle {
    let (sink, source) = transport.split();
    let sink: Arc<dyn FrameSink> = Arc::new(sink);
    let task = tokio::spawn(serve_loop(source, sink.clone(), Arc::new(table)));
    ServerHandle { sink, task }
}

async fn serve_loop<S: FrameSource>(
    mut source: S,
    sink: Arc<dyn FrameSink>,
    table: Arc<HandlerTable>,
) -> ServeStats {
    let mut stats = ServeStats::default();

    while let Some(frame) = source.recv().await {
        match codec::decode(&frame) {
            Decoded::Call(call) => {
                stats.calls += 1;
                tokio::spawn(dispatch(call, table.clone(), sink.clone()));
            }
            Decoded::Reply(reply) => {
                debug!(id = %reply.id, "server ignoring reply envelope");
            }
            Decoded::Malformed(reason) => {
                stats.malformed += 1;
                debug!(reason = %reason, "dropping malformed frame");
            }
        }
    }

    debug!(calls = stats.calls, malformed = stats.malformed, "serve loop finished");
    stats
}

async fn dispatch(call: CallEnvelope, table: Arc<HandlerTable>, sink: Arc<dyn FrameSink>) {
    let CallEnvelope { id, method, params } = call;
    let outcome = execute(method, params, &table).await;

    let frame = match codec::encode_reply(&id, outcome) {
        Ok(frame) => frame,
        Err(e) => {
            error!(id = %id, method = %method, error = %e, "failed to encode reply");
            let fallback = ReplyError::handler_failure(None, format!("result could not be encoded: {}", e));
            match codec::encode_reply(&id, Err(fallback)) {
                Ok(frame) => frame,
                Err(_) => return,
            }
        }
    };

    if let Err(e) = sink.post(frame) {
        debug!(id = %id, method = %method, error = %e, "reply not delivered");
    }
}

async fn execute(method: Method, params: Vec<Value>, table: &HandlerTable) -> Result<Value, ReplyError> {
    let params = SchemaRegistry::standard()
        .validate_method(method, params)
        .map_err(|e| {
            warn!(method = %method, error = %e, "rejecting invalid call");
            ReplyError::validation(e.to_string())
        })?;

    let Some(handler) = table.get(method) else {
        warn!(method = %method, "no handler registered");
        return Err(ReplyError::unhandled(method));
    };

    // A nested task turns a handler panic into a JoinError instead of a lost reply
    match tokio::spawn(async move { handler(params).await }).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(method = %method, code = e.code.as_str(), detail = ?e.detail, error = %e, "handler failed");
            Err(ReplyError {
                code: e.code,
                message: e.message,
                detail: e.detail,
            })
        }
        Err(e) => {
            error!(method = %method, error = %e, "handler panicked");
            Err(ReplyError::handler_failure(None, format!("handler for {} panicked", method)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_registration() {
        let table = HandlerTable::new()
            .with(Method::Mint, |_args| async { Ok(Value::Null) })
            .with(Method::Stream, |_args| async { Err(HandlerError::new("no")) });

        assert_eq!(table.len(), 2);
        assert!(table.contains(Method::Mint));
        assert!(!table.contains(Method::SendZap));
    }

    #[tokio::test]
    async fn test_execute_validates_first() {
        let table = HandlerTable::new().with(Method::Mint, |_args| async { Ok(Value::Null) });
        let err = execute(Method::Mint, vec![Value::Text("five".into())], &table)
            .await
            .unwrap_err();
        assert_eq!(err.code, codec::ErrorCode::Validation);
    }

    #[tokio::test]
    async fn test_execute_panicking_handler() {
        let table = HandlerTable::new().with(Method::BlockUser, |args: Vec<Value>| async move {
            if !args.is_empty() {
                panic!("boom");
            }
            Ok(Value::Null)
        });
        let err = execute(Method::BlockUser, vec![Value::Text("x".into())], &table)
            .await
            .unwrap_err();
        assert_eq!(err.code, codec::ErrorCode::HandlerFailure);
    }

    #[tokio::test]
    async fn test_execute_keeps_relayed_code() {
        let table = HandlerTable::new().with(Method::Mint, |_args| async {
            Err(HandlerError::relayed(ErrorCode::Validation, None, "amount must be positive"))
        });
        let err = execute(Method::Mint, vec![Value::Integer(1u64.into())], &table)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "amount must be positive");
        assert!(err.detail.is_none());
    }
}
