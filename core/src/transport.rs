//! The transport adapter: one `send` per request, delegated to a native engine.
//!
//! # Design
//! `send` translates the request head on the calling task, then moves the
//! native call onto a blocking worker. The worker copies the body, waits for
//! the status line, and assembles the response. Its result and the caller's
//! cancellation race to settle a single `PendingOperation`; whichever gets
//! there first is what `send` returns. A response that loses the race is
//! dropped on the worker, which releases its native resources.
//!
//! ```text
//! Building --> Submitted --> Succeeded
//!                        \-> Failed      (mapped native error, captive network)
//!                        \-> Cancelled   (token fired first)
//! ```
//!
//! The transport keeps no state between calls apart from the registry of
//! in-flight operations.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::body::{self, PrimaryStream, SecondaryStream};
use crate::config::TransportConfig;
use crate::engine::{ConnectionPool, NativeCall, NativeEngine, NoopPool};
use crate::error::TransportError;
use crate::headers;
use crate::http::{Headers, HttpRequest, HttpResponse, RequestBody, RequestHead, ResponseBody};
use crate::mapper::ErrorMapper;
use crate::pending::{PendingOperation, PendingRegistry};

type Outcome = Result<HttpResponse, TransportError>;

/// Lifecycle of a single `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Building,
    Submitted,
    Succeeded,
    Failed,
    Cancelled,
}

impl CallState {
    fn settled_by(outcome: &Outcome) -> Self {
        match outcome {
            Ok(_) => CallState::Succeeded,
            Err(TransportError::Cancelled) => CallState::Cancelled,
            Err(_) => CallState::Failed,
        }
    }
}

/// Protocol-agnostic HTTP transport over a native engine.
pub struct Transport<E> {
    engine: E,
    mapper: ErrorMapper,
    config: TransportConfig,
    pending: PendingRegistry<Arc<PendingOperation<Outcome>>>,
}

impl<E: NativeEngine> Transport<E> {
    /// Transport with captive-network checks off and no pool to evict.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, Arc::new(NoopPool), TransportConfig::default())
    }

    pub fn with_pool(engine: E, pool: Arc<dyn ConnectionPool>) -> Self {
        Self::with_config(engine, pool, TransportConfig::default())
    }

    pub fn with_config(engine: E, pool: Arc<dyn ConnectionPool>, config: TransportConfig) -> Self {
        Self {
            engine,
            mapper: ErrorMapper::new(pool),
            config,
            pending: PendingRegistry::new(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Evict every pooled connection of the engine.
    pub fn close_connections(&self) {
        self.mapper.evict_all();
    }

    /// Number of sends currently waiting on the engine.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Execute `request` on the native engine.
    ///
    /// Must be called from within a Tokio runtime. Cancelling `cancel`
    /// before the engine answers resolves to `TransportError::Cancelled`;
    /// cancelling after a response was returned makes further body reads
    /// fail with the same error.
    pub async fn send(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse, TransportError> {
        if cancel.is_cancelled() {
            debug!(uri = %request.uri, "cancelled before submission");
            return Err(TransportError::Cancelled);
        }

        let (head, body) = request.into_parts();
        let head = Arc::new(head);

        let mut call = self.engine.open(&head.uri).map_err(|e| self.mapper.map(e))?;
        call.set_method(head.method.as_str()).map_err(|e| self.mapper.map(e))?;
        let empty = Headers::new();
        let body_headers = body.as_ref().map_or(&empty, |b| &b.headers);
        headers::apply(&headers::to_native([&head.headers, body_headers]), call.as_mut());
        let abort = call.abort_handle();

        let (op, mut settled) = PendingOperation::new();
        let id = op.id();
        let _anchor = self.pending.anchor(id, op.clone());
        debug!(id, method = %head.method, uri = %head.uri, state = ?CallState::Building, "request translated");

        let exchange = Exchange {
            id,
            call,
            head,
            body,
            mapper: self.mapper.clone(),
            chunk_size: self.config.chunk_size(),
            captive_check: self.config.throw_on_captive_network,
            cancel: cancel.clone(),
        };
        let worker_op = op.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = catch_unwind(AssertUnwindSafe(move || exchange.run())).unwrap_or_else(|_| {
                Err(TransportError::ConnectFailure {
                    message: "native engine panicked".to_string(),
                    cause: None,
                })
            });
            let state = CallState::settled_by(&outcome);
            if !worker_op.complete(outcome) {
                debug!(id, ?state, "late native completion discarded");
            }
        });

        let outcome = tokio::select! {
            biased;
            outcome = &mut settled => outcome,
            _ = cancel.cancelled() => {
                if op.complete(Err(TransportError::Cancelled)) {
                    debug!(id, "cancelled while awaiting the engine");
                    if let Some(abort) = abort {
                        abort.abort();
                    }
                }
                settled.await
            }
        };

        let outcome = outcome.unwrap_or_else(|_| {
            Err(TransportError::ConnectFailure {
                message: "native engine dropped the request".to_string(),
                cause: None,
            })
        });
        debug!(id, state = ?CallState::settled_by(&outcome), "request settled");
        outcome
    }
}

impl<E> fmt::Debug for Transport<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.config)
            .field("in_flight", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Work done on the blocking worker for one request.
struct Exchange {
    id: u64,
    call: Box<dyn NativeCall>,
    head: Arc<RequestHead>,
    body: Option<RequestBody>,
    mapper: ErrorMapper,
    chunk_size: usize,
    captive_check: bool,
    cancel: CancellationToken,
}

impl Exchange {
    fn run(self) -> Outcome {
        let Exchange {
            id,
            mut call,
            head,
            body,
            mapper,
            chunk_size,
            captive_check,
            cancel,
        } = self;

        if let Some(mut body) = body {
            let mut sink = call.body_sink().map_err(|e| mapper.map_cancellable(e, &cancel))?;
            let copied = body::copy_body(&mut body.stream, &mut sink, chunk_size, &cancel, &mapper)?;
            drop(sink);
            trace!(id, bytes = copied, "request body handed to engine");
        }
        debug!(id, state = ?CallState::Submitted, "waiting for response headers");

        let status = call.response_code().map_err(|e| mapper.map_cancellable(e, &cancel))?;
        trace!(id, status, "status line received");

        if captive_check {
            let requested = head.uri.host().unwrap_or_default();
            let resolved = call.resolved_uri();
            if let Some(actual) = resolved.as_ref().and_then(|u| u.host()) {
                if !actual.eq_ignore_ascii_case(requested) {
                    warn!(id, requested, actual, "response came from a different host");
                    return Err(TransportError::ProtocolAnomaly {
                        detail: format!(
                            "hostnames don't match (requested {requested}, answered by {actual}), \
                             you are probably on a captive network"
                        ),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let (message_headers, content_headers) = headers::from_native(call.response_headers());
        let call = Arc::new(Mutex::new(call));
        let primary: PrimaryStream = {
            let call = call.clone();
            Box::new(move || call.lock().input())
        };
        let secondary: SecondaryStream = Box::new(move || call.lock().error_stream());
        let stream = body::compose_body(primary, secondary, mapper).with_cancellation(cancel);

        Ok(HttpResponse {
            status,
            headers: message_headers,
            body: ResponseBody::new(content_headers, stream),
            request: head,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use http::Uri;

    use super::*;
    use crate::engine::AbortHandle;
    use crate::error::{ErrorKind, NativeError};
    use crate::http::HttpMethod;

    #[derive(Clone)]
    struct Script {
        open_error: Option<NativeError>,
        status: Result<u16, NativeError>,
        resolved: Option<&'static str>,
        headers: Vec<(String, String)>,
        input: Result<Vec<u8>, NativeError>,
        error_body: Option<Vec<u8>>,
        panic: bool,
    }

    impl Default for Script {
        fn default() -> Self {
            Self {
                open_error: None,
                status: Ok(200),
                resolved: None,
                headers: Vec::new(),
                input: Ok(Vec::new()),
                error_body: None,
                panic: false,
            }
        }
    }

    #[derive(Default)]
    struct Log {
        opened: AtomicUsize,
        aborted: AtomicUsize,
        method: Mutex<Option<String>>,
        headers: Mutex<Vec<(String, String)>>,
        body: Mutex<Vec<u8>>,
        gate: Mutex<Option<mpsc::Receiver<()>>>,
        release: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl Log {
        fn open_gate(&self) {
            if let Some(tx) = self.release.lock().take() {
                let _ = tx.send(());
            }
        }
    }

    struct FakeEngine {
        script: Script,
        log: Arc<Log>,
    }

    impl FakeEngine {
        fn new(script: Script) -> (Self, Arc<Log>) {
            let log = Arc::new(Log::default());
            (Self { script, log: log.clone() }, log)
        }

        /// Engine whose `response_code` blocks until the gate opens.
        fn gated(script: Script) -> (Self, Arc<Log>) {
            let (engine, log) = Self::new(script);
            let (tx, rx) = mpsc::channel();
            *log.gate.lock() = Some(rx);
            *log.release.lock() = Some(tx);
            (engine, log)
        }
    }

    impl NativeEngine for FakeEngine {
        fn open(&self, _uri: &Uri) -> Result<Box<dyn NativeCall>, NativeError> {
            self.log.opened.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.script.open_error {
                return Err(err.clone());
            }
            Ok(Box::new(FakeCall {
                script: self.script.clone(),
                log: self.log.clone(),
            }))
        }
    }

    struct FakeCall {
        script: Script,
        log: Arc<Log>,
    }

    struct LogSink(Arc<Log>);

    impl Write for LogSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.body.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl NativeCall for FakeCall {
        fn set_method(&mut self, method: &str) -> Result<(), NativeError> {
            *self.log.method.lock() = Some(method.to_string());
            Ok(())
        }

        fn set_header(&mut self, name: &str, value: &str) {
            let mut headers = self.log.headers.lock();
            match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                Some(slot) => slot.1 = value.to_string(),
                None => headers.push((name.to_string(), value.to_string())),
            }
        }

        fn body_sink(&mut self) -> Result<Box<dyn Write + Send + '_>, NativeError> {
            Ok(Box::new(LogSink(self.log.clone())))
        }

        fn response_code(&mut self) -> Result<u16, NativeError> {
            let gate = self.log.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            if self.script.panic {
                panic!("engine crashed");
            }
            if self.log.aborted.load(Ordering::SeqCst) > 0 {
                return Err(NativeError::cancelled());
            }
            self.script.status.clone()
        }

        fn resolved_uri(&self) -> Option<Uri> {
            self.script.resolved.map(|u| u.parse().unwrap())
        }

        fn response_headers(&self) -> Vec<(String, String)> {
            self.script.headers.clone()
        }

        fn input(&mut self) -> Result<Box<dyn Read + Send>, NativeError> {
            self.script
                .input
                .clone()
                .map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>)
        }

        fn error_stream(&mut self) -> Option<Box<dyn Read + Send>> {
            self.script
                .error_body
                .clone()
                .map(|bytes| Box::new(Cursor::new(bytes)) as Box<dyn Read + Send>)
        }

        fn abort_handle(&self) -> Option<AbortHandle> {
            let log = self.log.clone();
            Some(AbortHandle::new(move || {
                log.aborted.fetch_add(1, Ordering::SeqCst);
                log.open_gate();
            }))
        }
    }

    #[derive(Default)]
    struct CountingPool(AtomicUsize);

    impl ConnectionPool for CountingPool {
        fn evict_all(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn assembles_status_headers_and_lazy_body() {
        let (engine, _log) = FakeEngine::new(Script {
            status: Ok(201),
            headers: pairs(&[("Content-Type", "text/plain"), ("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")]),
            input: Ok(b"hello".to_vec()),
            ..Script::default()
        });
        let transport = Transport::new(engine);

        let resp = transport
            .send(HttpRequest::get("http://example.com/x").unwrap(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.status, 201);
        assert_eq!(resp.headers.len(), 3);
        assert_eq!(resp.headers.get_all("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
        assert_eq!(resp.body.headers().len(), 1);
        assert_eq!(resp.body.headers().get("content-type"), Some("text/plain"));
        assert_eq!(resp.request.uri.path(), "/x");
        assert_eq!(resp.body.bytes().await.unwrap(), b"hello");
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn non_success_status_is_a_response_not_an_error() {
        let (engine, _log) = FakeEngine::new(Script {
            status: Ok(503),
            ..Script::default()
        });
        let resp = Transport::new(engine)
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 503);
    }

    #[tokio::test]
    async fn method_and_single_valued_headers_reach_the_engine() {
        let (engine, log) = FakeEngine::new(Script::default());
        let body = RequestBody::from_bytes(b"{}".to_vec()).with_header("Content-Type", "application/json");
        let request = HttpRequest::new(HttpMethod::parse("patch").unwrap(), "http://example.com/item")
            .unwrap()
            .with_header("X-Tag", "first")
            .with_header("x-tag", "second")
            .with_header("Content-Type", "text/plain")
            .with_body(body);

        Transport::new(engine)
            .send(request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(log.method.lock().as_deref(), Some("PATCH"));
        let headers = log.headers.lock().clone();
        // Lossy by contract: only the last X-Tag value survives.
        assert_eq!(
            headers,
            pairs(&[("x-tag", "second"), ("Content-Type", "application/json"), ("Content-Length", "2")])
        );
        assert_eq!(*log.body.lock(), b"{}");
    }

    #[tokio::test]
    async fn body_bytes_arrive_in_order_with_small_chunks() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 31 % 256) as u8).collect();
        let (engine, log) = FakeEngine::new(Script::default());
        let transport = Transport::with_config(
            engine,
            Arc::new(NoopPool),
            TransportConfig::default().copy_buffer_size(7),
        );
        let request = HttpRequest::post("http://example.com/upload", RequestBody::from_bytes(data.clone())).unwrap();

        transport.send(request, &CancellationToken::new()).await.unwrap();
        assert_eq!(*log.body.lock(), data);
    }

    #[tokio::test]
    async fn cancel_before_submission_never_reaches_the_engine() {
        let (engine, log) = FakeEngine::new(Script::default());
        let token = CancellationToken::new();
        token.cancel();

        let err = Transport::new(engine)
            .send(HttpRequest::get("http://example.com/").unwrap(), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(log.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_while_waiting_aborts_the_native_call() {
        let (engine, log) = FakeEngine::gated(Script::default());
        let transport = Transport::new(engine);
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let err = transport
            .send(HttpRequest::get("http://example.com/slow").unwrap(), &token)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(log.aborted.load(Ordering::SeqCst), 1);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn in_flight_counts_pending_sends() {
        let (engine, log) = FakeEngine::gated(Script::default());
        let transport = Arc::new(Transport::new(engine));

        let task = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationToken::new())
                    .await
            })
        };

        while transport.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        log.open_gate();
        let resp = task.await.unwrap().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancel_after_response_fails_body_reads() {
        let (engine, _log) = FakeEngine::new(Script {
            input: Ok(vec![1; 64]),
            ..Script::default()
        });
        let token = CancellationToken::new();
        let resp = Transport::new(engine)
            .send(HttpRequest::get("http://example.com/").unwrap(), &token)
            .await
            .unwrap();

        token.cancel();
        let err = resp.body.bytes().await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[tokio::test]
    async fn unknown_host_on_open_maps_to_name_resolution() {
        let (engine, _log) = FakeEngine::new(Script {
            open_error: Some(NativeError::unknown_host("no.such.host")),
            ..Script::default()
        });
        let err = Transport::new(engine)
            .send(HttpRequest::get("http://no.such.host/").unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameResolutionFailure);
    }

    #[tokio::test]
    async fn tls_mismatch_evicts_pool_and_maps_to_connect_failure() {
        let (engine, _log) = FakeEngine::new(Script {
            status: Err(NativeError::io("Hostname example.com was not verified")),
            ..Script::default()
        });
        let pool = Arc::new(CountingPool::default());
        let transport = Transport::with_pool(engine, pool.clone());

        let err = transport
            .send(HttpRequest::get("https://example.com/").unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectFailure);
        assert!(err.cause().is_some());
        assert_eq!(pool.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn captive_network_redirect_is_a_protocol_anomaly() {
        let script = Script {
            resolved: Some("http://login.hotel-wifi.example/portal"),
            ..Script::default()
        };

        let (engine, _log) = FakeEngine::new(script.clone());
        let strict = Transport::with_config(
            engine,
            Arc::new(NoopPool),
            TransportConfig::default().captive_network_checks(true),
        );
        let err = strict
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolAnomaly);

        let (engine, _log) = FakeEngine::new(script);
        let lenient = Transport::new(engine);
        let resp = lenient
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn captive_check_ignores_host_case_and_path_changes() {
        let (engine, _log) = FakeEngine::new(Script {
            resolved: Some("http://EXAMPLE.com/elsewhere"),
            ..Script::default()
        });
        let transport = Transport::with_config(
            engine,
            Arc::new(NoopPool),
            TransportConfig::default().captive_network_checks(true),
        );
        let resp = transport
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn missing_primary_stream_falls_back_to_error_stream() {
        let (engine, _log) = FakeEngine::new(Script {
            status: Ok(404),
            input: Err(NativeError::not_found("http://example.com/gone")),
            error_body: Some(vec![0x41, 0x42]),
            ..Script::default()
        });
        let resp = Transport::new(engine)
            .send(HttpRequest::get("http://example.com/gone").unwrap(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body.read_to_vec().unwrap(), vec![0x41, 0x42]);
    }

    #[tokio::test]
    async fn engine_panic_resolves_instead_of_hanging() {
        let (engine, _log) = FakeEngine::new(Script {
            panic: true,
            ..Script::default()
        });
        let transport = Transport::new(engine);
        let err = transport
            .send(HttpRequest::get("http://example.com/").unwrap(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectFailure);
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn close_connections_evicts_the_pool() {
        let (engine, _log) = FakeEngine::new(Script::default());
        let pool = Arc::new(CountingPool::default());
        Transport::with_pool(engine, pool.clone()).close_connections();
        assert_eq!(pool.0.load(Ordering::SeqCst), 1);
    }
}
