//! Typed RPC between the reel application and its background workers
//!
//! This crate provides:
//! - The schema registry of callable methods (Method, SchemaRegistry)
//! - The CBOR envelope codec (call and reply envelopes)
//! - Message transports (in-memory pair, length-prefixed byte stream)
//! - The RPC client with its pending call table
//! - The RPC server and handler table
//! - Worker lifecycle notifications

pub mod client;
pub mod codec;
pub mod error;
pub mod notifications;
pub mod schema;
pub mod server;
pub mod transport;

pub use ciborium::Value;
pub use client::{ClientConfig, PendingCall, RpcClient};
pub use codec::{CallEnvelope, Decoded, ErrorCode, ReplyEnvelope, ReplyError};
pub use error::RpcError;
pub use notifications::Notification;
pub use schema::{Method, MethodDescriptor, Namespace, ParamKind, ParamSlot, SchemaRegistry, ValidationError};
pub use server::{serve, HandlerError, HandlerFuture, HandlerTable, ServeStats, ServerHandle};
pub use transport::{Frame, FrameSink, FrameSource, Transport};

/// Default per-call deadline in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Largest frame a stream transport will send or accept
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the big-endian length prefix on stream frames
pub const LENGTH_PREFIX_SIZE: usize = 4;
