//! Classification of native failures into `TransportError`.
//!
//! Mapping is total. One path has a side effect: an I/O failure whose
//! message carries the TLS hostname-verification signature evicts the whole
//! connection pool, so a retry does not reuse the poisoned connection.
//!
//! A failure observed after the caller's token fired is `Cancelled` whatever
//! the engine reported, since engines tear streams down in their own terms.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::ConnectionPool;
use crate::error::{NativeError, NativeErrorCategory, TransportError};

#[derive(Clone)]
pub struct ErrorMapper {
    pool: Arc<dyn ConnectionPool>,
}

impl ErrorMapper {
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn map(&self, native: NativeError) -> TransportError {
        debug!(category = ?native.category, code = native.code, "mapping native error");
        match native.category {
            NativeErrorCategory::UnknownHost => TransportError::NameResolutionFailure {
                message: "Name resolution failure".to_string(),
                cause: native,
            },
            NativeErrorCategory::Io => {
                if is_tls_hostname_mismatch(&native.message) {
                    warn!(message = %native.message, "TLS hostname mismatch, evicting pooled connections");
                    self.pool.evict_all();
                }
                TransportError::ConnectFailure {
                    message: "IO Exception".to_string(),
                    cause: Some(native),
                }
            }
            NativeErrorCategory::Cancelled => TransportError::Cancelled,
            NativeErrorCategory::NotFound | NativeErrorCategory::Other => TransportError::ConnectFailure {
                message: native.message.clone(),
                cause: Some(native),
            },
        }
    }

    /// Like `map`, but a failure seen once `cancel` has fired is
    /// `Cancelled` and never reaches the classification rules.
    pub fn map_cancellable(&self, native: NativeError, cancel: &CancellationToken) -> TransportError {
        if cancel.is_cancelled() {
            debug!(category = ?native.category, "native failure after cancellation");
            return TransportError::Cancelled;
        }
        self.map(native)
    }

    pub fn evict_all(&self) {
        self.pool.evict_all();
    }
}

impl fmt::Debug for ErrorMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorMapper").finish_non_exhaustive()
    }
}

/// Signature of a certificate that does not cover the requested host, e.g.
/// `Hostname example.com was not verified`.
fn is_tls_hostname_mismatch(message: &str) -> bool {
    message.contains("Hostname") && message.contains("was not verified")
}
