//! RPC client
//!
//! Each call gets a fresh correlation id and an entry in the pending call
//! table. A single listener task owns the transport source and resolves
//! entries as replies arrive, in whatever order they come back.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use ciborium::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{self, Decoded, ReplyEnvelope};
use crate::error::RpcError;
use crate::schema::{Method, SchemaRegistry};
use crate::transport::{FrameSink, FrameSource, Transport};
use crate::DEFAULT_TIMEOUT_MS;

type Reply = Result<Value, RpcError>;

/// Client settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline applied to every call; `None` waits indefinitely
    pub call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_timeout_ms(DEFAULT_TIMEOUT_MS)
    }
}

impl ClientConfig {
    /// Deadline in milliseconds, `0` for none
    pub fn from_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            call_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }
}

struct PendingEntry {
    method: Method,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<String, PendingEntry>,
    closed: bool,
}

struct Shared {
    pending: Mutex<PendingTable>,
    sink: Arc<dyn FrameSink>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, reply: ReplyEnvelope) {
        let entry = self.table().entries.remove(&reply.id);
        let Some(entry) = entry else {
            debug!(id = %reply.id, "reply for unknown or expired call");
            return;
        };

        let outcome = reply.outcome.map_err(|e| e.into_rpc_error(entry.method));
        if let Err(e) = &outcome {
            debug!(id = %reply.id, method = %entry.method, error = %e, "call failed");
        }
        // The caller may have stopped waiting
        let _ = entry.tx.send(outcome);
    }

    /// Close the table and fail everything still pending
    fn reject_all(&self) {
        let drained: Vec<_> = {
            let mut table = self.table();
            table.closed = true;
            table.entries.drain().collect()
        };
        if !drained.is_empty() {
            warn!(pending = drained.len(), "transport closed with calls outstanding");
        }
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(RpcError::TransportClosed));
        }
    }

    fn forget(&self, id: &str) {
        self.table().entries.remove(id);
    }
}

/// Removes a call's pending entry when its future is dropped
struct PendingGuard {
    shared: Arc<Shared>,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.shared.forget(&self.id);
    }
}

/// Future for one outstanding call
pub struct PendingCall {
    id: String,
    inner: Pin<Box<dyn Future<Output = Reply> + Send>>,
}

impl PendingCall {
    /// Correlation id of the call
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingCall {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Reply> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Client end of an RPC transport
pub struct RpcClient {
    shared: Arc<Shared>,
    registry: SchemaRegistry,
    config: ClientConfig,
    listener: JoinHandle<()>,
}

impl RpcClient {
    /// Take ownership of a transport and start listening for replies
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<T: Transport>(transport: T, config: ClientConfig) -> Self {
        let (sink, source) = transport.split();
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingTable::default()),
            sink: Arc::new(sink),
        });
        let listener = tokio::spawn(listen(source, shared.clone()));

        Self {
            shared,
            registry: SchemaRegistry::standard(),
            config,
            listener,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Issue a call by wire name
    ///
    /// Unknown methods and invalid arguments fail here, before anything is
    /// posted.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<PendingCall, RpcError> {
        let method: Method = method.parse()?;
        self.call_method(method, args)
    }

    /// Issue a call with the client's default deadline
    pub fn call_method(&self, method: Method, args: Vec<Value>) -> Result<PendingCall, RpcError> {
        self.call_with_timeout(method, args, self.config.call_timeout)
    }

    /// Issue a call with an explicit deadline
    pub fn call_with_timeout(
        &self,
        method: Method,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<PendingCall, RpcError> {
        let params = self.registry.validate_method(method, args).map_err(|e| {
            debug!(method = %method, error = %e, "call rejected before send");
            RpcError::from(e)
        })?;

        let id = uuid::Uuid::new_v4().to_string();
        let frame = codec::encode_call(&id, method, params)?;
        let (tx, rx) = oneshot::channel();

        {
            let mut table = self.shared.table();
            if table.closed {
                return Err(RpcError::TransportClosed);
            }
            table.entries.insert(id.clone(), PendingEntry { method, tx });
        }
        let guard = PendingGuard {
            shared: self.shared.clone(),
            id: id.clone(),
        };

        // Dropping the guard on failure removes the entry again
        self.shared.sink.post(frame)?;
        debug!(id = %id, method = %method, "call posted");

        let inner = async move {
            let received = match timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(received) => received,
                    Err(_) => {
                        warn!(id = %guard.id, method = %method, "call timed out");
                        return Err(RpcError::Timeout(limit.as_millis() as u64));
                    }
                },
                None => rx.await,
            };
            drop(guard);
            // Sender dropped without a reply only happens on teardown
            received.unwrap_or(Err(RpcError::TransportClosed))
        };

        Ok(PendingCall {
            id,
            inner: Box::pin(inner),
        })
    }

    /// Call and await the result
    pub async fn request(&self, method: Method, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_method(method, args)?.await
    }

    /// Number of calls awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.shared.table().entries.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.table().closed || self.shared.sink.is_closed()
    }

    /// Reject all pending calls with `TransportClosed` and close the transport
    pub fn terminate(&self) {
        self.shared.reject_all();
        self.shared.sink.terminate();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.terminate();
        self.listener.abort();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

async fn listen<S: FrameSource>(mut source: S, shared: Arc<Shared>) {
    while let Some(frame) = source.recv().await {
        match codec::decode(&frame) {
            Decoded::Reply(reply) => shared.resolve(reply),
            Decoded::Call(call) => {
                debug!(id = %call.id, method = %call.method, "client ignoring inbound call");
            }
            Decoded::Malformed(reason) => {
                debug!(reason = %reason, "dropping malformed frame");
            }
        }
    }
    debug!("client transport closed");
    shared.reject_all();
}
