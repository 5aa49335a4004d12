//! Reel daemon
//!
//! `reeld serve` starts the feed, ledger and distribution workers and
//! exposes them through the TCP gateway. `reeld call` sends a single call
//! to a running gateway and prints the result as JSON.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use libreel_core::load_config;
use libreel_ipc::{ClientConfig, Notification, Value};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reeld::{connect, DaemonError, Gateway, Supervisor};

#[derive(Parser)]
#[command(name = "reeld", about = "Reel worker daemon", version)]
struct Cli {
    /// Directory holding config.toml and worker state
    #[arg(long, global = true, default_value = ".reel")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workers and the gateway
    Serve {
        /// Gateway listen address (overrides config)
        #[arg(long)]
        listen: Option<String>,
    },
    /// Send one call to a running gateway
    Call {
        /// Gateway address (defaults to the configured listen address)
        #[arg(long)]
        connect: Option<String>,

        /// Method name, e.g. queryFeed
        method: String,

        /// Arguments as JSON; `@path` sends a file's bytes
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so `call` output stays clean
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Command::Serve { listen } => run_serve(&cli.data_dir, listen).await,
        Command::Call { connect, method, args } => run_call(&cli.data_dir, connect, &method, &args).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_serve(data_dir: &Path, listen: Option<String>) -> Result<(), DaemonError> {
    let config = load_config(data_dir)?.unwrap_or_default();
    let listen = listen.unwrap_or_else(|| config.gateway.listen.clone());
    info!(data_dir = %data_dir.display(), "reeld starting");

    let mut supervisor = Supervisor::start(data_dir, &config).await?;
    if let Some(mut notifications) = supervisor.take_notifications() {
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                log_notification(&notification);
            }
        });
    }

    let gateway = match Gateway::bind(&listen, supervisor.router()).await {
        Ok(gateway) => gateway,
        Err(e) => {
            supervisor.shutdown().await;
            return Err(e);
        }
    };

    let result = tokio::select! {
        result = gateway.run() => result,
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            Ok(())
        }
    };

    supervisor.shutdown().await;
    info!("reeld stopped");
    result
}

async fn run_call(
    data_dir: &Path,
    addr: Option<String>,
    method: &str,
    args: &[String],
) -> Result<(), DaemonError> {
    let config = load_config(data_dir)?.unwrap_or_default();
    let addr = addr.unwrap_or_else(|| config.gateway.listen.clone());

    let args = args.iter().map(|arg| parse_arg(arg)).collect::<Result<Vec<_>, _>>()?;
    let client = connect(&addr, ClientConfig::from_timeout_ms(config.rpc.call_timeout_ms)).await?;
    let result = client.call(method, args)?.await?;

    match result.deserialized::<serde_json::Value>() {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{:?}", result),
    }
    Ok(())
}

/// JSON when it parses, a file's bytes for `@path`, otherwise a plain string
fn parse_arg(arg: &str) -> Result<Value, DaemonError> {
    if let Some(path) = arg.strip_prefix('@') {
        return Ok(Value::Bytes(std::fs::read(path)?));
    }
    let json = serde_json::from_str::<serde_json::Value>(arg)
        .unwrap_or_else(|_| serde_json::Value::String(arg.to_string()));
    Value::serialized(&json).map_err(|e| DaemonError::InvalidArgs(format!("{}: {}", arg, e)))
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::WorkerStarted { namespace, methods } => {
            info!(namespace = %namespace, methods, "worker ready");
        }
        Notification::WorkerStopped { namespace, calls, reason } => {
            info!(namespace = %namespace, calls, reason = %reason, "worker exited");
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
