//! Request body copying and lazy response body composition.
//!
//! # Design
//! Outbound, the body is pumped from the caller's single-pass stream into
//! the engine's output channel in fixed-size chunks, checking the
//! cancellation token before every chunk so no write happens after a
//! cancel is observed.
//!
//! Inbound, the response body is the concatenation of the engine's primary
//! stream and its secondary (error) stream. Neither is opened until the
//! first read. A primary stream that does not exist counts as empty, not as
//! a failure; every other read error goes through the error mapper so the
//! consumer sees the portable taxonomy. A failed body stays failed: later
//! reads repeat the same error instead of reporting end of stream.

use std::io::{self, Read, Write};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{NativeError, NativeErrorCategory, TransportError};
use crate::mapper::ErrorMapper;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Copy `source` into `sink` until the source is exhausted.
///
/// Returns the number of bytes written. Fails with `Cancelled` as soon as
/// the token is observed, without writing the pending chunk.
pub fn copy_body(
    source: &mut dyn Read,
    sink: &mut dyn Write,
    chunk_size: usize,
    cancel: &CancellationToken,
    mapper: &ErrorMapper,
) -> Result<u64, TransportError> {
    // Engines tear the channel down when cancelled; report that as such.
    let fail = |e: io::Error| mapper.map_cancellable(e.into(), cancel);
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(fail(e)),
        };
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        sink.write_all(&buf[..n]).map_err(fail)?;
        total += n as u64;
    }
    sink.flush().map_err(fail)?;
    if cancel.is_cancelled() {
        return Err(TransportError::Cancelled);
    }
    trace!(bytes = total, "request body copied");
    Ok(total)
}

pub type PrimaryStream = Box<dyn FnOnce() -> Result<Box<dyn Read + Send>, NativeError> + Send>;
pub type SecondaryStream = Box<dyn FnOnce() -> Option<Box<dyn Read + Send>> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Primary,
    Secondary,
    Done,
}

/// Forward-only concatenation of the primary and secondary response streams.
pub struct ComposedBody {
    primary: Option<PrimaryStream>,
    secondary: Option<SecondaryStream>,
    current: Option<Box<dyn Read + Send>>,
    stage: Stage,
    mapper: ErrorMapper,
    cancel: Option<CancellationToken>,
    failed: Option<TransportError>,
}

/// Build a lazy body from its two stream factories.
pub fn compose_body(primary: PrimaryStream, secondary: SecondaryStream, mapper: ErrorMapper) -> ComposedBody {
    ComposedBody {
        primary: Some(primary),
        secondary: Some(secondary),
        current: None,
        stage: Stage::Primary,
        mapper,
        cancel: None,
        failed: None,
    }
}

impl ComposedBody {
    /// Fail reads with `Cancelled` and release the native streams once
    /// `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn release(&mut self) {
        self.current = None;
        self.primary = None;
        self.secondary = None;
        self.stage = Stage::Done;
    }

    /// Release the streams and remember `err` for every later read.
    fn fail(&mut self, err: TransportError) -> io::Error {
        self.release();
        self.failed = Some(err.clone());
        err.into_io()
    }

    fn translate(&self, native: NativeError) -> TransportError {
        match &self.cancel {
            Some(token) => self.mapper.map_cancellable(native, token),
            None => self.mapper.map(native),
        }
    }

    /// Move to the next stream. Returns `Ok(false)` once both are spent.
    fn advance(&mut self) -> io::Result<bool> {
        match self.stage {
            Stage::Primary => {
                self.stage = Stage::Secondary;
                let Some(open) = self.primary.take() else {
                    return Ok(true);
                };
                match open() {
                    Ok(stream) => self.current = Some(stream),
                    Err(e) if e.category == NativeErrorCategory::NotFound => {
                        trace!("primary stream missing, treating as empty");
                    }
                    Err(e) => {
                        let err = self.translate(e);
                        return Err(self.fail(err));
                    }
                }
                Ok(true)
            }
            Stage::Secondary => {
                self.stage = Stage::Done;
                if let Some(open) = self.secondary.take() {
                    self.current = open();
                }
                Ok(true)
            }
            Stage::Done => Ok(false),
        }
    }
}

impl Read for ComposedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(err) = &self.failed {
            return Err(err.clone().into_io());
        }
        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(self.fail(TransportError::Cancelled));
            }
            if let Some(stream) = self.current.as_mut() {
                match stream.read(buf) {
                    Ok(0) => self.current = None,
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let err = self.translate(NativeError::from(e));
                        return Err(self.fail(err));
                    }
                }
            }
            if !self.advance()? {
                return Ok(0);
            }
        }
    }
}
