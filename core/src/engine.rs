//! Contract between the transport and the platform's native HTTP engine.
//!
//! # Design
//! The engine is a black box shaped like a classic connection object: open a
//! call for a URL, set the method and headers one value at a time, write the
//! body into an output channel, then ask for the status code. That last call
//! blocks until headers are available and is the single synchronous point the
//! transport bridges onto its awaitable `send`. Every method runs on a
//! blocking worker, never on the async executor.
//!
//! The connection pool is a separate, injected handle so a poisoned pool can
//! be evicted without reaching into global state.

use std::fmt;
use std::io::{Read, Write};

use http::Uri;

use crate::error::NativeError;

/// A platform HTTP engine.
pub trait NativeEngine: Send + Sync {
    /// Create a call for `uri`. No I/O is expected here.
    fn open(&self, uri: &Uri) -> Result<Box<dyn NativeCall>, NativeError>;
}

/// One request/response exchange on the native engine.
pub trait NativeCall: Send {
    fn set_method(&mut self, method: &str) -> Result<(), NativeError>;

    /// Set a single-valued header. A second call for the same name replaces
    /// the first.
    fn set_header(&mut self, name: &str, value: &str);

    /// Output channel for the request body. Dropping the writer closes it.
    fn body_sink(&mut self) -> Result<Box<dyn Write + Send + '_>, NativeError>;

    /// Block until the status line is available.
    fn response_code(&mut self) -> Result<u16, NativeError>;

    /// The URI the engine finally talked to, after any redirects.
    fn resolved_uri(&self) -> Option<Uri>;

    /// Every response header instance in the order the engine reports them.
    fn response_headers(&self) -> Vec<(String, String)>;

    /// Primary response stream. Engines may fail with
    /// `NativeErrorCategory::NotFound` when there is no body.
    fn input(&mut self) -> Result<Box<dyn Read + Send>, NativeError>;

    /// Secondary (error/diagnostic) stream, if the engine keeps one.
    fn error_stream(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Hook that asks the engine to stop this call.
    fn abort_handle(&self) -> Option<AbortHandle> {
        None
    }
}

/// A one-shot native cancel hook.
pub struct AbortHandle(Box<dyn FnOnce() + Send>);

impl AbortHandle {
    pub fn new(hook: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(hook))
    }

    pub fn abort(self) {
        (self.0)()
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AbortHandle")
    }
}

/// The engine's process-wide connection pool.
pub trait ConnectionPool: Send + Sync {
    /// Close every cached connection. Other in-flight calls may be affected.
    fn evict_all(&self);
}

/// Pool for engines that do not cache connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPool;

impl ConnectionPool for NoopPool {
    fn evict_all(&self) {}
}
