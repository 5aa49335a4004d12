//! Reel daemon
//!
//! Runs the feed, ledger and distribution workers, each in its own
//! execution context behind an RPC server, and exposes them over a TCP
//! gateway.

pub mod error;
pub mod gateway;
pub mod supervisor;
pub mod workers;

pub use error::DaemonError;
pub use gateway::{connect, forwarding_table, Gateway};
pub use supervisor::{Router, Supervisor};
