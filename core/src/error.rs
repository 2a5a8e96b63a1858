//! Error types for the transport adapter.
//!
//! # Design
//! `TransportError` is the only error a caller of `Transport::send` ever
//! sees. Native engines report failures as `NativeError`, a plain record of
//! stable fields (category, domain, code, message) rather than a type
//! hierarchy; the error mapper turns each one into exactly one
//! `TransportError` and keeps the native record attached as the source.

use std::fmt;
use std::io;

use thiserror::Error;

/// Tag of a `TransportError`, for callers that only need the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NameResolutionFailure,
    ConnectFailure,
    ProtocolAnomaly,
    Cancelled,
}

/// Portable failure of a single `send`.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The host name could not be resolved.
    #[error("name resolution failure: {message}")]
    NameResolutionFailure {
        message: String,
        #[source]
        cause: NativeError,
    },

    /// Connecting or exchanging bytes failed. Also the conservative default
    /// for anything the mapper does not recognise.
    #[error("connect failure: {message}")]
    ConnectFailure {
        message: String,
        #[source]
        cause: Option<NativeError>,
    },

    /// The engine answered, but not from the host that was asked; usually a
    /// captive network intercepting traffic.
    #[error("protocol anomaly: {detail}")]
    ProtocolAnomaly { detail: String },

    /// The caller's cancellation token fired first.
    #[error("request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::NameResolutionFailure { .. } => ErrorKind::NameResolutionFailure,
            TransportError::ConnectFailure { .. } => ErrorKind::ConnectFailure,
            TransportError::ProtocolAnomaly { .. } => ErrorKind::ProtocolAnomaly,
            TransportError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The native error this was mapped from, if any.
    pub fn cause(&self) -> Option<&NativeError> {
        match self {
            TransportError::NameResolutionFailure { cause, .. } => Some(cause),
            TransportError::ConnectFailure { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn connect(message: &str, detail: String) -> Self {
        TransportError::ConnectFailure {
            message: message.to_string(),
            cause: Some(NativeError::new(NativeErrorCategory::Other, detail)),
        }
    }

    /// Wrap for transport through `std::io::Read`. Never `Interrupted`:
    /// `read_to_end` retries those.
    pub fn into_io(self) -> io::Error {
        io::Error::other(self)
    }

    /// Recover a `TransportError` that crossed a `Read` boundary. Plain I/O
    /// errors become `ConnectFailure`.
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<TransportError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(transport) = inner.downcast::<TransportError>() {
                    return *transport;
                }
            }
            return TransportError::ConnectFailure {
                message: "I/O error".to_string(),
                cause: None,
            };
        }
        TransportError::ConnectFailure {
            message: "I/O error".to_string(),
            cause: Some(NativeError::from(err)),
        }
    }
}

/// Coarse classification a native engine attaches to its failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorCategory {
    /// DNS lookup failed.
    UnknownHost,
    /// Any socket or stream failure.
    Io,
    /// The requested stream does not exist (some engines raise this instead
    /// of returning an empty body for error statuses).
    NotFound,
    /// The engine stopped because it was asked to.
    Cancelled,
    Other,
}

/// A failure reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub category: NativeErrorCategory,
    pub domain: Option<String>,
    pub code: i64,
    pub message: String,
}

impl NativeError {
    pub fn new(category: NativeErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            domain: None,
            code: 0,
            message: message.into(),
        }
    }

    pub fn unknown_host(message: impl Into<String>) -> Self {
        Self::new(NativeErrorCategory::UnknownHost, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(NativeErrorCategory::Io, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(NativeErrorCategory::NotFound, message)
    }

    pub fn cancelled() -> Self {
        Self::new(NativeErrorCategory::Cancelled, "operation aborted")
    }

    pub fn with_domain(mut self, domain: impl Into<String>, code: i64) -> Self {
        self.domain = Some(domain.into());
        self.code = code;
        self
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{:?} [{domain} {}]: {}", self.category, self.code, self.message),
            None => write!(f, "{:?}: {}", self.category, self.message),
        }
    }
}

impl std::error::Error for NativeError {}

impl From<io::Error> for NativeError {
    fn from(err: io::Error) -> Self {
        if let Some(TransportError::Cancelled) =
            err.get_ref().and_then(|inner| inner.downcast_ref::<TransportError>())
        {
            return NativeError::cancelled();
        }
        let category = match err.kind() {
            io::ErrorKind::NotFound => NativeErrorCategory::NotFound,
            _ => NativeErrorCategory::Io,
        };
        NativeError::new(category, err.to_string())
    }
}

/// A request that cannot be built.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("URI must be absolute: {0}")]
    RelativeUri(String),

    #[error("invalid method: {0:?}")]
    InvalidMethod(String),
}
