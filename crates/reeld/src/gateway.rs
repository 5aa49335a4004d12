//! Gateway - exposes the supervisor to out-of-process callers
//!
//! Each accepted TCP connection gets its own serve loop over a
//! length-prefixed stream transport. Every handler relays the call to the
//! worker that owns the method. Worker replies keep their reply code, so
//! remote callers see the same errors as in-process ones. Failures between
//! the gateway and a worker (closed transport, timeout) have no reply code
//! and arrive as `handler_failure` with the client code in `detail`.

use std::net::SocketAddr;

use libreel_ipc::transport::StreamTransport;
use libreel_ipc::{serve, ClientConfig, ErrorCode, HandlerError, HandlerTable, Method, RpcClient, RpcError};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::DaemonError;
use crate::supervisor::Router;

/// Handler table whose every entry forwards to the router
pub fn forwarding_table(router: &Router) -> HandlerTable {
    let mut table = HandlerTable::new();
    for method in Method::ALL {
        let router = router.clone();
        table.register(method, move |args| {
            let call = router.dispatch(method, args).map_err(relay_error);
            async move { call?.await.map_err(relay_error) }
        });
    }
    table
}

/// Carry a worker error back to the remote caller without losing its code
fn relay_error(err: RpcError) -> HandlerError {
    match err {
        RpcError::HandlerFailure { detail, message } => HandlerError::relayed(ErrorCode::HandlerFailure, detail, message),
        RpcError::Validation(message) => HandlerError::relayed(ErrorCode::Validation, None, message),
        RpcError::UnhandledMethod(method) => HandlerError::relayed(
            ErrorCode::UnhandledMethod,
            None,
            format!("no handler registered for {}", method),
        ),
        other => HandlerError::with_detail(other.code(), other.to_string()),
    }
}

pub struct Gateway {
    listener: TcpListener,
    router: Router,
}

impl Gateway {
    pub async fn bind(addr: &str, router: Router) -> Result<Self, DaemonError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DaemonError::BindFailed(format!("{}: {}", addr, e)))?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DaemonError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is cancelled
    pub async fn run(self) -> Result<(), DaemonError> {
        let table = forwarding_table(&self.router);
        info!(addr = %self.local_addr()?, "gateway listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "could not set nodelay");
            }
            debug!(peer = %peer, "connection accepted");

            let server = serve(StreamTransport::new(stream), table.clone());
            tokio::spawn(async move {
                let stats = server.join().await;
                debug!(peer = %peer, calls = stats.calls, malformed = stats.malformed, "connection closed");
            });
        }
    }
}

/// Connect a client to a running gateway
pub async fn connect(addr: &str, config: ClientConfig) -> Result<RpcClient, DaemonError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(RpcClient::connect(StreamTransport::new(stream), config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_keeps_domain_detail() {
        let err = relay_error(RpcError::HandlerFailure {
            detail: Some("not_found".into()),
            message: "not found: post p1".into(),
        });
        assert_eq!(err.detail.as_deref(), Some("not_found"));
        assert_eq!(err.message, "not found: post p1");

        assert_eq!(err.code, ErrorCode::HandlerFailure);

        let err = relay_error(RpcError::TransportClosed);
        assert_eq!(err.code, ErrorCode::HandlerFailure);
        assert_eq!(err.detail.as_deref(), Some("transport_closed"));
    }

    #[test]
    fn test_relay_keeps_reply_code() {
        let err = relay_error(RpcError::Validation("amount: expected unsigned".into()));
        assert_eq!(err.code, ErrorCode::Validation);
        assert_eq!(err.message, "amount: expected unsigned");
        assert!(err.detail.is_none());

        let err = relay_error(RpcError::UnhandledMethod("mint".into()));
        assert_eq!(err.code, ErrorCode::UnhandledMethod);
    }
}
