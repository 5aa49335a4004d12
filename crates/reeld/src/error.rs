//! Errors raised by the daemon outside of individual RPC calls

use libreel_ipc::Namespace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    /// Gateway address unusable or already taken
    #[error("cannot listen on {0}")]
    BindFailed(String),

    /// A worker's state could not be opened
    #[error("{namespace} worker did not start: {reason}")]
    WorkerFailed { namespace: Namespace, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Reel(#[from] libreel_core::ReelError),

    #[error("call failed: {0}")]
    Rpc(#[from] libreel_ipc::RpcError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
