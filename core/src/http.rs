//! Generic request/response model shared by every native engine.
//!
//! # Design
//! These types describe an HTTP exchange independently of the engine that
//! performs it. A request is immutable once handed to `Transport::send`: its
//! head is split off and shared with the resulting response as a read-only
//! back-reference, while its body is consumed exactly once by the outbound
//! copy.
//!
//! Header collections keep the casing they were given and compare names
//! case-insensitively on lookup.

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use http::Uri;

use crate::body::ComposedBody;
use crate::error::{RequestError, TransportError};

/// HTTP method in its uppercase canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
    Connect,
    /// Any other token, stored uppercased.
    Extension(String),
}

impl HttpMethod {
    /// Parse a method token, upper-casing it first.
    pub fn parse(token: &str) -> Result<Self, RequestError> {
        let upper = token.trim().to_ascii_uppercase();
        if upper.is_empty() || upper.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(RequestError::InvalidMethod(token.to_string()));
        }
        Ok(match upper.as_str() {
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "OPTIONS" => HttpMethod::Options,
            "TRACE" => HttpMethod::Trace,
            "CONNECT" => HttpMethod::Connect,
            _ => HttpMethod::Extension(upper),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Extension(token) => token,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header multimap.
///
/// Repeated names are kept as separate entries in insertion order. Lookups
/// ignore ASCII case; iteration yields names exactly as they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value without touching existing entries of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value recorded for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Outbound body: a single-pass byte stream plus the headers that describe it.
pub struct RequestBody {
    pub headers: Headers,
    pub stream: Box<dyn Read + Send>,
}

impl RequestBody {
    pub fn new(stream: impl Read + Send + 'static) -> Self {
        Self {
            headers: Headers::new(),
            stream: Box::new(stream),
        }
    }

    /// In-memory body with `Content-Length` declared.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let mut headers = Headers::new();
        headers.append("Content-Length", bytes.len().to_string());
        Self {
            headers,
            stream: Box::new(io::Cursor::new(bytes)),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Everything about a request except its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: HttpMethod,
    pub uri: Uri,
    pub headers: Headers,
}

/// A request ready to be handed to `Transport::send`.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    /// Build a request for an absolute URI.
    pub fn new(method: HttpMethod, uri: &str) -> Result<Self, RequestError> {
        let uri: Uri = uri.parse()?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(RequestError::RelativeUri(uri.to_string()));
        }
        Ok(Self {
            method,
            uri,
            headers: Headers::new(),
            body: None,
        })
    }

    pub fn get(uri: &str) -> Result<Self, RequestError> {
        Self::new(HttpMethod::Get, uri)
    }

    pub fn post(uri: &str, body: RequestBody) -> Result<Self, RequestError> {
        Ok(Self::new(HttpMethod::Post, uri)?.with_body(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn into_parts(self) -> (RequestHead, Option<RequestBody>) {
        let head = RequestHead {
            method: self.method,
            uri: self.uri,
            headers: self.headers,
        };
        (head, self.body)
    }
}

/// Inbound body: lazily read, forward-only, not restartable.
///
/// Carries the content-describing headers of the response separately from
/// the response's own header collection.
pub struct ResponseBody {
    headers: Headers,
    stream: ComposedBody,
}

impl ResponseBody {
    pub(crate) fn new(headers: Headers, stream: ComposedBody) -> Self {
        Self { headers, stream }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Drain the body on the current thread.
    pub fn read_to_vec(mut self) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        self.read_to_end(&mut out).map_err(TransportError::from_io)?;
        Ok(out)
    }

    /// Drain the body on a blocking worker.
    pub async fn bytes(self) -> Result<Vec<u8>, TransportError> {
        tokio::task::spawn_blocking(move || self.read_to_vec())
            .await
            .map_err(|e| TransportError::connect("body reader stopped", e.to_string()))?
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A response assembled by the transport after the engine reports success.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: ResponseBody,
    /// The request this response answers, for diagnostics.
    pub request: Arc<RequestHead>,
}
