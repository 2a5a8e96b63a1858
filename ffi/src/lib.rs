//! A `NativeEngine` backed by a host network stack reached over the C ABI.
//!
//! # Overview
//! Some platforms only expose their HTTP engine through a callback API: the
//! host takes a fully buffered request, runs the exchange on its own
//! threads, and reports the outcome later for an integer token. This crate
//! adapts that shape to `nethandler_core::NativeEngine`, so a `Transport`
//! can drive it like any blocking connection object.
//!
//! # Design
//! - `HostCall` buffers the request body, then `response_code` hands the
//!   request to the host's `start` callback and blocks on a
//!   `PendingOperation` until the host answers.
//! - The host holds only a token. A process-wide `PendingRegistry` anchors
//!   each token's completion slot for the whole wait and drops it on every
//!   exit path, so late or duplicate completions find nothing and are
//!   refused with `NhStatus::UnknownToken`.
//! - Aborting settles the slot with a native `Cancelled` error after asking
//!   the host to stop, so the waiting worker never depends on the host
//!   honouring the abort.
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.

pub mod types;

use std::ffi::CString;
use std::io::{Cursor, Read, Write};
use std::panic::catch_unwind;
use std::sync::{Arc, LazyLock};

use nethandler_core::{
    AbortHandle, ConnectionPool, NativeCall, NativeEngine, NativeError, NativeErrorCategory, PendingOperation,
    PendingRegistry, Uri,
};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use types::*;

type HostCompletion = Result<HostResponse, NativeError>;
type Slot = Arc<PendingOperation<HostCompletion>>;

static PENDING: LazyLock<PendingRegistry<Slot>> = LazyLock::new(PendingRegistry::new);

/// The host's function table, shareable across worker threads.
#[derive(Clone, Copy)]
struct HostVtable(NhHostEngine);

// SAFETY: the host contract requires `ctx` and the callbacks to be usable
// from any thread.
unsafe impl Send for HostVtable {}
unsafe impl Sync for HostVtable {}

impl HostVtable {
    fn abort(&self, token: u64) {
        if let Some(abort) = self.0.abort {
            abort(self.0.ctx, token);
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Native engine implemented by the host.
pub struct HostEngine {
    vtable: HostVtable,
}

impl HostEngine {
    /// Wrap a host function table. Returns `None` without a `start` callback.
    ///
    /// # Safety
    /// `ctx` must stay valid for as long as the engine or any `HostPool`
    /// made from it is alive, and every callback must be safe to call from
    /// any thread.
    pub unsafe fn new(table: NhHostEngine) -> Option<Self> {
        table.start?;
        Some(Self {
            vtable: HostVtable(table),
        })
    }

    /// The host's connection pool, for `Transport::with_pool`.
    pub fn pool(&self) -> HostPool {
        HostPool {
            vtable: self.vtable,
        }
    }
}

impl NativeEngine for HostEngine {
    fn open(&self, uri: &Uri) -> Result<Box<dyn NativeCall>, NativeError> {
        let (slot, settled) = PendingOperation::new();
        trace!(token = slot.id(), %uri, "host call opened");
        Ok(Box::new(HostCall {
            vtable: self.vtable,
            url: uri.to_string(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            slot,
            settled: Some(settled),
            response: None,
        }))
    }
}

/// `ConnectionPool` that forwards eviction to the host.
#[derive(Clone, Copy)]
pub struct HostPool {
    vtable: HostVtable,
}

impl ConnectionPool for HostPool {
    fn evict_all(&self) {
        if let Some(evict) = self.vtable.0.evict_all {
            debug!("evicting host connection pool");
            evict(self.vtable.0.ctx);
        }
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

struct HostCall {
    vtable: HostVtable,
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    slot: Slot,
    settled: Option<oneshot::Receiver<HostCompletion>>,
    response: Option<HostResponse>,
}

/// The request header count as the ABI carries it.
fn header_count(len: usize) -> Result<u32, NativeError> {
    u32::try_from(len).map_err(|_| NativeError::new(NativeErrorCategory::Other, format!("too many headers: {len}")))
}

impl HostCall {
    fn token(&self) -> u64 {
        self.slot.id()
    }

    fn start(&self) -> Result<(), NativeError> {
        let invalid = |what: &str| NativeError::new(NativeErrorCategory::Other, format!("{what} contains NUL"));
        let method = CString::new(self.method.as_str()).map_err(|_| invalid("method"))?;
        let url = CString::new(self.url.as_str()).map_err(|_| invalid("url"))?;
        let mut owned = Vec::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = CString::new(name.as_str()).map_err(|_| invalid("header name"))?;
            let value = CString::new(value.as_str()).map_err(|_| invalid("header value"))?;
            owned.push((name, value));
        }
        let headers: Vec<NhHeader> = owned
            .iter()
            .map(|(name, value)| NhHeader {
                name: name.as_ptr(),
                value: value.as_ptr(),
            })
            .collect();

        let request = NhRequest {
            token: self.token(),
            method: method.as_ptr(),
            url: url.as_ptr(),
            headers: if headers.is_empty() { std::ptr::null() } else { headers.as_ptr() },
            headers_len: header_count(headers.len())?,
            body: if self.body.is_empty() { std::ptr::null() } else { self.body.as_ptr() },
            body_len: self.body.len(),
        };

        let Some(start) = self.vtable.0.start else {
            return Err(NativeError::new(NativeErrorCategory::Other, "host engine has no start callback"));
        };
        match start(self.vtable.0.ctx, &request) {
            0 => Ok(()),
            code => Err(NativeError::io("host refused the request").with_domain("host", i64::from(code))),
        }
    }
}

impl NativeCall for HostCall {
    fn set_method(&mut self, method: &str) -> Result<(), NativeError> {
        self.method = method.to_string();
        Ok(())
    }

    fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    fn body_sink(&mut self) -> Result<Box<dyn Write + Send + '_>, NativeError> {
        Ok(Box::new(&mut self.body))
    }

    fn response_code(&mut self) -> Result<u16, NativeError> {
        if let Some(response) = &self.response {
            return Ok(response.status);
        }
        let settled = self
            .settled
            .take()
            .ok_or_else(|| NativeError::new(NativeErrorCategory::Other, "host call already failed"))?;

        let token = self.token();
        let _anchor = PENDING.anchor(token, self.slot.clone());
        // An abort that raced ahead of us has already settled the slot.
        if !self.slot.is_settled() {
            if let Err(err) = self.start() {
                self.slot.complete(Err(err));
            } else {
                debug!(token, method = %self.method, url = %self.url, "request handed to host");
            }
        }

        let completion = settled
            .blocking_recv()
            .map_err(|_| NativeError::io("host dropped the request"))?;
        let response = completion?;
        trace!(token, status = response.status, "host answered");
        let status = response.status;
        self.response = Some(response);
        Ok(status)
    }

    fn resolved_uri(&self) -> Option<Uri> {
        let url = self.response.as_ref()?.final_url.as_deref()?;
        url.parse().ok()
    }

    fn response_headers(&self) -> Vec<(String, String)> {
        self.response.as_ref().map(|r| r.headers.clone()).unwrap_or_default()
    }

    fn input(&mut self) -> Result<Box<dyn Read + Send>, NativeError> {
        match self.response.as_mut().and_then(|r| r.body.take()) {
            Some(body) => Ok(Box::new(Cursor::new(body))),
            None => Err(NativeError::not_found(self.url.clone())),
        }
    }

    fn error_stream(&mut self) -> Option<Box<dyn Read + Send>> {
        let body = self.response.as_mut()?.error_body.take()?;
        Some(Box::new(Cursor::new(body)))
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        let vtable = self.vtable;
        let slot = self.slot.clone();
        Some(AbortHandle::new(move || {
            let token = slot.id();
            debug!(token, "aborting host request");
            vtable.abort(token);
            slot.complete(Err(NativeError::cancelled()));
        }))
    }
}

// ---------------------------------------------------------------------------
// Completion entry points
// ---------------------------------------------------------------------------

fn settle(token: u64, completion: HostCompletion) -> NhStatus {
    let Some(slot) = PENDING.take(token) else {
        warn!(token, "completion for unknown token");
        return NhStatus::UnknownToken;
    };
    if slot.complete(completion) {
        NhStatus::Ok
    } else {
        debug!(token, "completion for settled token ignored");
        NhStatus::UnknownToken
    }
}

/// Report the response for `token`.
///
/// Everything `response` points to is copied before this returns. Returns
/// `UnknownToken` when the request is no longer in flight (already
/// completed, aborted, or never started).
#[unsafe(no_mangle)]
pub extern "C" fn nh_complete_response(token: u64, response: *const NhResponse) -> NhStatus {
    catch_unwind(|| {
        if response.is_null() {
            return NhStatus::NullArg;
        }
        let response = unsafe { HostResponse::copy_from(&*response) };
        settle(token, Ok(response))
    })
    .unwrap_or(NhStatus::Panic)
}

/// Report that the request for `token` failed.
#[unsafe(no_mangle)]
pub extern "C" fn nh_complete_error(token: u64, error: *const NhNativeError) -> NhStatus {
    catch_unwind(|| {
        if error.is_null() {
            return NhStatus::NullArg;
        }
        let error = unsafe { (*error).to_native() };
        settle(token, Err(error))
    })
    .unwrap_or(NhStatus::Panic)
}

/// Number of requests currently waiting on the host.
#[unsafe(no_mangle)]
pub extern "C" fn nh_pending_count() -> usize {
    catch_unwind(|| PENDING.len()).unwrap_or(0)
}
