//! Supervisor module - runs one worker per namespace
//!
//! The supervisor:
//! - Starts each worker on its own OS thread with its own runtime
//! - Connects to each worker only through a memory transport
//! - Holds one long-lived RPC client per worker
//! - Routes calls by method namespace
//! - Emits worker lifecycle notifications

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libreel_core::ReelConfig;
use libreel_ipc::transport::pair;
use libreel_ipc::{
    serve, ClientConfig, HandlerTable, Method, Namespace, Notification, PendingCall, RpcClient,
    RpcError, Value,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::DaemonError;
use crate::workers;

/// Builds a worker's handler table inside its own thread
type TableFactory = Box<dyn FnOnce() -> Result<HandlerTable, DaemonError> + Send>;

/// Cloneable handle that routes calls to the right worker
#[derive(Clone)]
pub struct Router {
    clients: Arc<HashMap<Namespace, Arc<RpcClient>>>,
}

impl Router {
    /// Client for a namespace
    pub fn client(&self, namespace: Namespace) -> Option<Arc<RpcClient>> {
        self.clients.get(&namespace).cloned()
    }

    /// Issue a call on the worker serving `method`
    pub fn dispatch(&self, method: Method, args: Vec<Value>) -> Result<PendingCall, RpcError> {
        let client = self
            .clients
            .get(&method.namespace())
            .ok_or(RpcError::TransportClosed)?;
        client.call_method(method, args)
    }

    pub async fn call(&self, method: Method, args: Vec<Value>) -> Result<Value, RpcError> {
        self.dispatch(method, args)?.await
    }

    /// Issue a call by wire name
    pub async fn call_by_name(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call(method.parse()?, args).await
    }

    fn terminate_all(&self) {
        for client in self.clients.values() {
            client.terminate();
        }
    }
}

struct WorkerHandle {
    thread: std::thread::JoinHandle<()>,
}

/// Supervisor manages worker threads and their clients
pub struct Supervisor {
    router: Router,
    workers: HashMap<Namespace, WorkerHandle>,
    notify_rx: Option<mpsc::Receiver<Notification>>,
}

impl Supervisor {
    /// Start all workers with state under `data_dir`
    pub async fn start(data_dir: &Path, config: &ReelConfig) -> Result<Self, DaemonError> {
        let mut factories: Vec<(Namespace, TableFactory)> = Vec::new();
        for namespace in Namespace::ALL {
            let data_dir: PathBuf = data_dir.to_path_buf();
            let config = config.clone();
            let factory: TableFactory = Box::new(move || workers::open_handlers(namespace, &data_dir, &config));
            factories.push((namespace, factory));
        }
        Self::launch(factories, ClientConfig::from_timeout_ms(config.rpc.call_timeout_ms)).await
    }

    /// Start workers from prebuilt handler tables
    pub async fn with_tables(
        tables: Vec<(Namespace, HandlerTable)>,
        client_config: ClientConfig,
    ) -> Result<Self, DaemonError> {
        let factories = tables
            .into_iter()
            .map(|(namespace, table)| {
                let factory: TableFactory = Box::new(move || Ok(table));
                (namespace, factory)
            })
            .collect();
        Self::launch(factories, client_config).await
    }

    async fn launch(
        factories: Vec<(Namespace, TableFactory)>,
        client_config: ClientConfig,
    ) -> Result<Self, DaemonError> {
        let (notify_tx, notify_rx) = mpsc::channel(1000);
        let mut clients = HashMap::new();
        let mut workers = HashMap::new();

        for (namespace, factory) in factories {
            match spawn_worker(namespace, factory, client_config, notify_tx.clone()).await {
                Ok((client, handle)) => {
                    clients.insert(namespace, Arc::new(client));
                    workers.insert(namespace, handle);
                }
                Err(e) => {
                    // Stop whatever already started before reporting
                    let partial = Supervisor {
                        router: Router {
                            clients: Arc::new(clients),
                        },
                        workers,
                        notify_rx: None,
                    };
                    partial.shutdown().await;
                    return Err(e);
                }
            }
        }

        info!(workers = workers.len(), "supervisor started");
        Ok(Self {
            router: Router {
                clients: Arc::new(clients),
            },
            workers,
            notify_rx: Some(notify_rx),
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn call(&self, method: Method, args: Vec<Value>) -> Result<Value, RpcError> {
        self.router.call(method, args).await
    }

    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.workers.keys().copied()
    }

    /// Take the notification receiver (only once)
    ///
    /// The stream ends after every worker has stopped.
    pub fn take_notifications(&mut self) -> Option<mpsc::Receiver<Notification>> {
        self.notify_rx.take()
    }

    /// Terminate every worker transport and wait for the threads to exit
    pub async fn shutdown(mut self) {
        info!("supervisor shutting down");
        self.router.terminate_all();

        for (namespace, handle) in self.workers.drain() {
            match tokio::task::spawn_blocking(move || handle.thread.join()).await {
                Ok(Ok(())) => debug!(namespace = %namespace, "worker joined"),
                Ok(Err(_)) => error!(namespace = %namespace, "worker thread panicked"),
                Err(e) => error!(namespace = %namespace, error = %e, "failed to join worker"),
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            warn!("supervisor dropped without shutdown");
            self.router.terminate_all();
        }
    }
}

async fn spawn_worker(
    namespace: Namespace,
    factory: TableFactory,
    client_config: ClientConfig,
    notify_tx: mpsc::Sender<Notification>,
) -> Result<(RpcClient, WorkerHandle), DaemonError> {
    let (local, remote) = pair();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<usize, DaemonError>>();

    let stop_tx = notify_tx.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let thread = std::thread::Builder::new()
        .name(format!("reel-{}", namespace))
        .spawn(move || {
            runtime.block_on(async move {
                let table = match factory() {
                    Ok(table) => table,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let methods = table.len();
                let server = serve(remote, table);
                let _ = ready_tx.send(Ok(methods));
                info!(namespace = %namespace, methods, "worker started");

                let stats = server.join().await;
                info!(namespace = %namespace, calls = stats.calls, "worker stopped");
                let stopped = Notification::worker_stopped(namespace, stats.calls, "transport closed");
                let _ = stop_tx.try_send(stopped);
            });
        })?;

    let methods = match ready_rx.await {
        Ok(Ok(methods)) => methods,
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(DaemonError::WorkerFailed {
                namespace,
                reason: e.to_string(),
            });
        }
        Err(_) => {
            return Err(DaemonError::WorkerFailed {
                namespace,
                reason: "worker exited before it was ready".to_string(),
            });
        }
    };

    let client = RpcClient::connect(local, client_config);
    let _ = notify_tx.try_send(Notification::worker_started(namespace, methods));
    Ok((client, WorkerHandle { thread }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use libreel_ipc::HandlerError;

    #[tokio::test]
    async fn test_routes_by_namespace() {
        let ledger = HandlerTable::new().with(Method::Mint, |args: Vec<Value>| async move { Ok(args[0].clone()) });
        let distribution = HandlerTable::new().with(Method::Stream, |_args: Vec<Value>| async {
            Err(HandlerError::with_detail("not_found", "no peers"))
        });

        let mut supervisor = Supervisor::with_tables(
            vec![(Namespace::Ledger, ledger), (Namespace::Distribution, distribution)],
            ClientConfig::default(),
        )
        .await
        .unwrap();
        let mut notifications = supervisor.take_notifications().unwrap();

        let minted = supervisor.call(Method::Mint, vec![Value::Integer(3u64.into())]).await.unwrap();
        assert_eq!(minted, Value::Integer(3u64.into()));

        let err = supervisor
            .call(Method::Stream, vec![Value::Text("magnet:?".into())])
            .await
            .unwrap_err();
        assert_eq!(err.detail(), Some("not_found"));

        // No feed worker was started
        let err = supervisor
            .call(Method::BlockUser, vec![Value::Text("x".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));

        supervisor.shutdown().await;

        let mut started = 0;
        let mut stopped = 0;
        while let Ok(n) = notifications.try_recv() {
            match n {
                Notification::WorkerStarted { .. } => started += 1,
                Notification::WorkerStopped { .. } => stopped += 1,
            }
        }
        assert_eq!(started, 2);
        assert_eq!(stopped, 2);
    }

    #[tokio::test]
    async fn test_failed_worker_reports_namespace() {
        let factory: TableFactory = Box::new(|| Err(DaemonError::InvalidArgs("broken".into())));
        let result = Supervisor::launch(vec![(Namespace::Feed, factory)], ClientConfig::default()).await;
        match result {
            Err(DaemonError::WorkerFailed { namespace, reason }) => {
                assert_eq!(namespace, Namespace::Feed);
                assert!(reason.contains("broken"));
            }
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("worker should have failed"),
        }
    }
}
