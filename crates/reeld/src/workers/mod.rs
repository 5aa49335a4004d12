//! Domain workers
//!
//! Each worker owns one namespace's state and turns it into a handler
//! table. Handlers receive arguments already normalized by the schema
//! registry, one value per parameter slot.

use std::path::Path;
use std::sync::Arc;

use libreel_core::{ReelConfig, ReelError};
use libreel_ipc::{HandlerError, HandlerFuture, HandlerTable, Namespace, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DaemonError;

pub mod distribution;
pub mod feed;
pub mod ledger;

pub use distribution::DistributionWorker;
pub use feed::FeedWorker;
pub use ledger::LedgerWorker;

/// Open the state for `namespace` under `data_dir` and build its handlers
pub fn open_handlers(namespace: Namespace, data_dir: &Path, config: &ReelConfig) -> Result<HandlerTable, DaemonError> {
    let table = match namespace {
        Namespace::Feed => Arc::new(FeedWorker::open(data_dir, &config.feed)?).handlers(),
        Namespace::Ledger => Arc::new(LedgerWorker::new(&config.ledger)).handlers(),
        Namespace::Distribution => {
            Arc::new(DistributionWorker::open(data_dir, &config.distribution)?).handlers()
        }
    };
    Ok(table)
}

/// Relay a domain error to the caller with its stable code
pub(crate) fn domain_error(err: ReelError) -> HandlerError {
    HandlerError::with_detail(err.error_code(), err.to_string())
}

fn invalid(message: String) -> HandlerError {
    HandlerError::with_detail("invalid_args", message)
}

pub(crate) fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, HandlerError> {
    Value::serialized(value).map_err(|e| HandlerError::with_detail("internal_error", e.to_string()))
}

/// Optional record argument
pub(crate) fn record_arg<T: DeserializeOwned>(args: &[Value], index: usize, name: &str) -> Result<Option<T>, HandlerError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .deserialized()
            .map(Some)
            .map_err(|e| invalid(format!("{}: {}", name, e))),
    }
}

pub(crate) fn text_arg(args: &[Value], index: usize) -> Option<String> {
    args.get(index).and_then(Value::as_text).map(str::to_string)
}

pub(crate) fn required_text(args: &[Value], index: usize, name: &str) -> Result<String, HandlerError> {
    text_arg(args, index).ok_or_else(|| invalid(format!("{} is required", name)))
}

pub(crate) fn unsigned_arg(args: &[Value], index: usize) -> Option<u64> {
    args.get(index)
        .and_then(Value::as_integer)
        .and_then(|i| u64::try_from(i).ok())
}

/// Wrap a synchronous operation on shared worker state as a handler
///
/// The operation runs on the blocking pool so sled, filesystem and peer
/// I/O never stall the worker's serve loop.
pub(crate) fn sync_handler<W, F>(
    worker: &Arc<W>,
    op: F,
) -> impl Fn(Vec<Value>) -> HandlerFuture + Send + Sync + 'static
where
    W: Send + Sync + 'static,
    F: Fn(&W, Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    let worker = worker.clone();
    let op = Arc::new(op);
    move |args| -> HandlerFuture {
        let worker = worker.clone();
        let op = op.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || op(&worker, args))
                .await
                .map_err(|e| HandlerError::with_detail("internal_error", format!("worker task failed: {}", e)))?
        })
    }
}
