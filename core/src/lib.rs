//! Pluggable HTTP transport over a platform's native network engine.
//!
//! # Overview
//! Callers issue protocol-agnostic `HttpRequest`s through `Transport::send`;
//! the socket work is delegated to a `NativeEngine`. The transport translates
//! headers in both directions, streams request bodies into the engine,
//! exposes the engine's response streams as one lazy body, and maps every
//! native failure onto a small portable taxonomy.
//!
//! # Design
//! - The engine's blocking "wait for the status line" call runs on a Tokio
//!   blocking worker; `send` itself only awaits a single-assignment
//!   completion slot, which also resolves cancellation races.
//! - Native errors are records of stable fields (`NativeError`), classified
//!   by `ErrorMapper`; no engine error type escapes `send`.
//! - The connection pool is injected (`ConnectionPool`) so tests can count
//!   evictions.

pub mod body;
pub mod config;
pub mod engine;
pub mod error;
pub mod headers;
pub mod http;
pub mod mapper;
pub mod pending;
pub mod transport;

pub use config::TransportConfig;
pub use engine::{AbortHandle, ConnectionPool, NativeCall, NativeEngine, NoopPool};
pub use error::{ErrorKind, NativeError, NativeErrorCategory, RequestError, TransportError};
pub use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse, RequestBody, RequestHead, ResponseBody};
pub use mapper::ErrorMapper;
pub use pending::{PendingOperation, PendingRegistry};
pub use transport::{CallState, Transport};

pub use ::http::Uri;
pub use tokio_util::sync::CancellationToken;
