//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! The host owns every pointer it hands over. Requests are only valid for
//! the duration of the `start` callback and responses only for the duration
//! of `nh_complete_*`; the Rust side copies what it needs into owned values
//! before returning. Conversion helpers live here to keep `lib.rs` focused on
//! the engine and the `extern "C"` surface.

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

use nethandler_core::{NativeError, NativeErrorCategory};

// ---------------------------------------------------------------------------
// Host engine
// ---------------------------------------------------------------------------

/// Function table a host fills in to provide the network engine.
///
/// `start` receives each request and returns 0 when it accepted it; the
/// host later reports back with `nh_complete_response` or
/// `nh_complete_error` for the request's token, from any thread. `abort`
/// and `evict_all` are optional.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NhHostEngine {
    pub ctx: *mut c_void,
    pub start: Option<extern "C" fn(ctx: *mut c_void, request: *const NhRequest) -> i32>,
    pub abort: Option<extern "C" fn(ctx: *mut c_void, token: u64)>,
    pub evict_all: Option<extern "C" fn(ctx: *mut c_void)>,
}

/// A header as a pair of NUL-terminated strings.
#[repr(C)]
pub struct NhHeader {
    pub name: *const c_char,
    pub value: *const c_char,
}

/// A request handed to the host's `start` callback.
#[repr(C)]
pub struct NhRequest {
    pub token: u64,
    pub method: *const c_char,
    pub url: *const c_char,
    pub headers: *const NhHeader,
    pub headers_len: u32,
    pub body: *const u8,
    pub body_len: usize,
}

// ---------------------------------------------------------------------------
// Completions (host-provided, read but never freed by us)
// ---------------------------------------------------------------------------

/// A response reported by the host.
///
/// `body_missing` marks a response without a primary stream, which is how
/// some engines answer error statuses; the body then comes from
/// `error_body` if that is non-null. `final_url` is the URL after redirects
/// and may be null.
#[repr(C)]
pub struct NhResponse {
    pub status: u16,
    pub final_url: *const c_char,
    pub headers: *const NhHeader,
    pub headers_len: u32,
    pub body: *const u8,
    pub body_len: usize,
    pub body_missing: bool,
    pub error_body: *const u8,
    pub error_body_len: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NhErrorCategory {
    UnknownHost = 0,
    Io = 1,
    NotFound = 2,
    Cancelled = 3,
    Other = 4,
}

impl From<NhErrorCategory> for NativeErrorCategory {
    fn from(c: NhErrorCategory) -> Self {
        match c {
            NhErrorCategory::UnknownHost => NativeErrorCategory::UnknownHost,
            NhErrorCategory::Io => NativeErrorCategory::Io,
            NhErrorCategory::NotFound => NativeErrorCategory::NotFound,
            NhErrorCategory::Cancelled => NativeErrorCategory::Cancelled,
            NhErrorCategory::Other => NativeErrorCategory::Other,
        }
    }
}

/// A failure reported by the host. `domain` and `message` may be null.
#[repr(C)]
pub struct NhNativeError {
    pub category: NhErrorCategory,
    pub domain: *const c_char,
    pub code: i64,
    pub message: *const c_char,
}

/// Result of an `nh_*` call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NhStatus {
    Ok = 0,
    /// The token is not in flight, or it was already settled.
    UnknownToken = 1,
    NullArg = 2,
    Panic = 3,
}

// ---------------------------------------------------------------------------
// Owned copies
// ---------------------------------------------------------------------------

/// A host response copied into owned memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResponse {
    pub status: u16,
    pub final_url: Option<String>,
    pub headers: Vec<(String, String)>,
    /// `None` when the host reported no primary stream.
    pub body: Option<Vec<u8>>,
    pub error_body: Option<Vec<u8>>,
}

impl HostResponse {
    /// Copy a host response.
    ///
    /// # Safety
    /// Every non-null pointer in `resp` must be valid for its stated length
    /// (strings NUL-terminated).
    pub(crate) unsafe fn copy_from(resp: &NhResponse) -> Self {
        let body = if resp.body_missing {
            None
        } else {
            Some(unsafe { copy_bytes(resp.body, resp.body_len) })
        };
        let error_body = if resp.error_body.is_null() {
            None
        } else {
            Some(unsafe { copy_bytes(resp.error_body, resp.error_body_len) })
        };
        Self {
            status: resp.status,
            final_url: unsafe { copy_str(resp.final_url) },
            headers: unsafe { copy_headers(resp.headers, resp.headers_len) },
            body,
            error_body,
        }
    }
}

impl NhNativeError {
    /// # Safety
    /// `domain` and `message` must be null or NUL-terminated.
    pub(crate) unsafe fn to_native(&self) -> NativeError {
        let message = unsafe { copy_str(self.message) }.unwrap_or_default();
        let err = NativeError::new(self.category.into(), message);
        match unsafe { copy_str(self.domain) } {
            Some(domain) => err.with_domain(domain, self.code),
            None => NativeError { code: self.code, ..err },
        }
    }
}

/// Lossy copy of a C string; null maps to `None`.
///
/// # Safety
/// `p` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn copy_str(p: *const c_char) -> Option<String> {
    if p.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
}

/// # Safety
/// `p` must be null or valid for `len` bytes.
pub(crate) unsafe fn copy_bytes(p: *const u8, len: usize) -> Vec<u8> {
    if p.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(p, len) }.to_vec()
}

/// Entries with a null name are skipped; a null value reads as empty.
///
/// # Safety
/// `p` must be null or valid for `len` headers.
pub(crate) unsafe fn copy_headers(p: *const NhHeader, len: u32) -> Vec<(String, String)> {
    if p.is_null() || len == 0 {
        return Vec::new();
    }
    let raw = unsafe { std::slice::from_raw_parts(p, len as usize) };
    raw.iter()
        .filter_map(|h| {
            let name = unsafe { copy_str(h.name) }?;
            let value = unsafe { copy_str(h.value) }.unwrap_or_default();
            Some((name, value))
        })
        .collect()
}
