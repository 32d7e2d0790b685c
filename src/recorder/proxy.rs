//! Recording proxy server

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureLogWriter, CapturedExchange};
use crate::config::RecorderConfig;
use crate::recorder::{CaptureBuffer, TeeBody, DRAIN_TIMEOUT_MS, WRITER_QUEUE_DEPTH};
use crate::{Result, RetraceError};

/// Callback invoked synchronously for every emitted record
pub type ExchangeObserver = Arc<dyn Fn(&CapturedExchange) + Send + Sync>;

/// Recording proxy with an explicit Stopped/Running lifecycle.
///
/// While running, every exchange is forwarded to the configured target and
/// captured to the log file. `start` fails with `AlreadyRunning` on a
/// running instance; `stop` drains in-flight exchanges with a deadline and
/// is a no-op when already stopped.
pub struct Recorder {
    observer: Option<ExchangeObserver>,
    record_count: Arc<AtomicUsize>,
    handle: Option<RunningRecorder>,
}

struct RunningRecorder {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

struct ProxyContext {
    client: Client<HttpConnector, TeeBody<Incoming>>,
    target_authority: String,
    record_tx: mpsc::Sender<CapturedExchange>,
}

impl Recorder {
    /// Create a stopped recorder
    #[must_use]
    pub fn new() -> Self {
        Self {
            observer: None,
            record_count: Arc::new(AtomicUsize::new(0)),
            handle: None,
        }
    }

    /// Create a stopped recorder whose observer is invoked once per
    /// captured exchange, at emission time
    #[must_use]
    pub fn with_observer(observer: ExchangeObserver) -> Self {
        Self {
            observer: Some(observer),
            record_count: Arc::new(AtomicUsize::new(0)),
            handle: None,
        }
    }

    /// Whether the recorder is currently running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Bound address while running
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.as_ref().map(|h| h.local_addr)
    }

    /// Records written to the capture log, cumulative across runs
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.record_count.load(Ordering::Relaxed)
    }

    /// Start listening and forwarding.
    ///
    /// Binds the listener before returning, so a successful return means
    /// the port is owned.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if a previous start has not been stopped,
    /// a configuration error for an invalid target, or an I/O error if the
    /// port cannot be bound or the log file cannot be opened
    pub async fn start(&mut self, config: RecorderConfig) -> Result<()> {
        if let Some(running) = &self.handle {
            return Err(RetraceError::AlreadyRunning(running.local_addr.port()));
        }

        config.validate()?;

        let target_uri: Uri = config.target.parse().map_err(|e| {
            RetraceError::ConfigError(format!("target is not a valid URL: {e}"))
        })?;
        let Some(authority) = target_uri.authority() else {
            return Err(RetraceError::ConfigError(
                "target is missing a host".to_string(),
            ));
        };
        let target_authority = authority.to_string();

        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.port))).await?;
        let local_addr = listener.local_addr()?;

        let writer = CaptureLogWriter::open(&config.log_path).await?;
        let (record_tx, record_rx) = mpsc::channel(WRITER_QUEUE_DEPTH);
        let writer_task = tokio::spawn(writer_loop(
            writer,
            record_rx,
            Arc::clone(&self.record_count),
            self.observer.clone(),
        ));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        let context = Arc::new(ProxyContext {
            client,
            target_authority,
            record_tx,
        });

        let (shutdown_tx, _) = broadcast::channel(1);
        let accept_task = tokio::spawn(accept_loop(listener, context, shutdown_tx.subscribe()));

        info!("Recording proxy listening on {local_addr}, forwarding to {}", config.target);

        self.handle = Some(RunningRecorder {
            local_addr,
            shutdown_tx,
            accept_task,
            writer_task,
        });

        Ok(())
    }

    /// Stop listening and drain in-flight exchanges.
    ///
    /// Waits up to the drain deadline for open connections to finish and
    /// for the writer to flush; stragglers are aborted and produce no
    /// record. Returns `false` when the recorder was not running.
    pub async fn stop(&mut self) -> bool {
        let Some(mut running) = self.handle.take() else {
            return false;
        };

        info!("Stopping recorder on {}", running.local_addr);
        running.shutdown_tx.send(()).ok();

        let drain = Duration::from_millis(DRAIN_TIMEOUT_MS);

        match tokio::time::timeout(drain, &mut running.accept_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Accept task ended abnormally: {e}"),
            Err(_) => {
                warn!("Drain deadline reached, aborting accept task");
                running.accept_task.abort();
            }
        }

        match tokio::time::timeout(drain, &mut running.writer_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Writer task ended abnormally: {e}"),
            Err(_) => {
                warn!("Capture writer did not flush within the drain deadline");
                running.writer_task.abort();
            }
        }

        info!("Recorder stopped");
        true
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        // Dropping a running recorder releases the port without a drain
        if let Some(running) = &self.handle {
            running.accept_task.abort();
            running.writer_task.abort();
        }
    }
}

/// Accept connections until shutdown, then drain with a deadline
async fn accept_loop(
    listener: TcpListener,
    context: Arc<ProxyContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("Accepted connection from {peer_addr}");
                        let context = Arc::clone(&context);
                        connections.spawn(serve_connection(stream, context));
                    }
                    Err(e) => {
                        error!("Accept error: {e}");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Recorder accept loop shutting down");
                break;
            }
        }
    }

    drop(listener);

    let drain = Duration::from_millis(DRAIN_TIMEOUT_MS);
    let drained = tokio::time::timeout(drain, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "Drain deadline reached, aborting {} in-flight connections",
            connections.len()
        );
        connections.abort_all();
    }
}

/// Serve one client connection
async fn serve_connection(stream: TcpStream, context: Arc<ProxyContext>) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req| {
        let context = Arc::clone(&context);
        async move { Ok::<_, Infallible>(handle_exchange(req, context).await) }
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        // Resets and half-closed keep-alives are routine
        debug!("Connection ended: {e}");
    }
}

/// Forward one exchange and arrange for its capture
async fn handle_exchange(
    req: Request<Incoming>,
    context: Arc<ProxyContext>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let method = req.method().to_string();
    let url = req
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), ToString::to_string);

    debug!("Proxying {method} {url}");

    let request_buffer = CaptureBuffer::new();
    let (parts, body) = req.into_parts();
    let teed_request = TeeBody::new(body, request_buffer.clone());

    match send_upstream(&context, parts.method, parts.headers, teed_request, &url).await {
        Ok(upstream) => {
            let status = upstream.status().as_u16();
            let (mut resp_parts, resp_body) = upstream.into_parts();
            strip_hop_headers(&mut resp_parts.headers);

            let response_buffer = CaptureBuffer::new();
            let (done_tx, done_rx) = oneshot::channel();
            let teed_response =
                TeeBody::with_completion(resp_body, response_buffer.clone(), done_tx);

            spawn_record_assembly(
                Arc::clone(&context),
                method,
                url,
                status,
                request_buffer,
                response_buffer,
                done_rx,
            );

            Response::from_parts(resp_parts, teed_response.boxed())
        }
        Err(e) => {
            warn!("Upstream request failed for {method} {url}: {e}");

            let body = serde_json::json!({
                "error": "Proxy error",
                "details": e.to_string(),
            })
            .to_string();

            // The failed exchange is captured too; the success filter
            // keeps it out of replay
            let record = CapturedExchange::new(
                method,
                url,
                StatusCode::BAD_GATEWAY.as_u16(),
                buffer_to_string(&request_buffer),
                body.clone(),
            );
            if context.record_tx.send(record).await.is_err() {
                warn!("Capture writer closed, dropping record");
            }

            json_response(StatusCode::BAD_GATEWAY, body)
        }
    }
}

/// Build and send the forwarded request
async fn send_upstream(
    context: &ProxyContext,
    method: Method,
    mut headers: HeaderMap,
    body: TeeBody<Incoming>,
    path_and_query: &str,
) -> Result<Response<Incoming>> {
    let uri: Uri = format!("http://{}{path_and_query}", context.target_authority)
        .parse()
        .map_err(|e| RetraceError::Upstream(format!("Invalid forward URI: {e}")))?;

    // Compressed upstream bodies would defeat byte-level capture
    headers.remove(ACCEPT_ENCODING);
    strip_hop_headers(&mut headers);

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .map_err(|e| RetraceError::Upstream(format!("Failed to build forward request: {e}")))?;
    *request.headers_mut() = headers;

    context
        .client
        .request(request)
        .await
        .map_err(|e| RetraceError::Upstream(e.to_string()))
}

/// Wait for the response to finish streaming, then emit the record
fn spawn_record_assembly(
    context: Arc<ProxyContext>,
    method: String,
    url: String,
    status: u16,
    request_buffer: CaptureBuffer,
    response_buffer: CaptureBuffer,
    done_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        if done_rx.await.is_err() {
            debug!("Exchange aborted before completion: {method} {url}");
            return;
        }

        let record = CapturedExchange::new(
            method,
            url,
            status,
            buffer_to_string(&request_buffer),
            buffer_to_string(&response_buffer),
        );

        if context.record_tx.send(record).await.is_err() {
            warn!("Capture writer closed, dropping record");
        }
    });
}

/// Single owner of the log file; appends records in completion order
async fn writer_loop(
    mut writer: CaptureLogWriter,
    mut record_rx: mpsc::Receiver<CapturedExchange>,
    record_count: Arc<AtomicUsize>,
    observer: Option<ExchangeObserver>,
) {
    while let Some(record) = record_rx.recv().await {
        match writer.append(&record).await {
            Ok(()) => {
                record_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Failed to append capture record: {e}");
            }
        }

        if let Some(observer) = &observer {
            observer(&record);
        }
    }

    debug!("Capture writer finished");
}

/// Hop-by-hop headers are connection-scoped and never relayed
fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ] {
        headers.remove(name);
    }
}

fn buffer_to_string(buffer: &CaptureBuffer) -> String {
    let bytes = buffer.snapshot();
    match std::str::from_utf8(&bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            warn!("Captured body is not valid UTF-8, converting lossily");
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

fn json_response(status: StatusCode, body: String) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(
        Full::new(Bytes::from(body))
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> RecorderConfig {
        RecorderConfig {
            port: 0,
            target: "http://127.0.0.1:9".to_string(),
            log_path: dir.path().join("capture.log"),
        }
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new();

        assert!(!recorder.is_running());
        assert!(recorder.local_addr().is_none());

        recorder.start(test_config(&dir)).await.unwrap();
        assert!(recorder.is_running());
        assert!(recorder.local_addr().is_some());

        assert!(recorder.stop().await);
        assert!(!recorder.is_running());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let mut recorder = Recorder::new();
        assert!(!recorder.stop().await);

        let dir = TempDir::new().unwrap();
        recorder.start(test_config(&dir)).await.unwrap();
        assert!(recorder.stop().await);
        assert!(!recorder.stop().await);
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new();

        recorder.start(test_config(&dir)).await.unwrap();
        let err = recorder.start(test_config(&dir)).await.unwrap_err();

        assert!(matches!(err, RetraceError::AlreadyRunning(_)));
        // The running instance is unaffected
        assert!(recorder.is_running());

        recorder.stop().await;
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new();

        recorder.start(test_config(&dir)).await.unwrap();
        recorder.stop().await;

        recorder.start(test_config(&dir)).await.unwrap();
        assert!(recorder.is_running());
        recorder.stop().await;
    }

    #[tokio::test]
    async fn test_start_rejects_bad_target() {
        let dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new();

        let config = RecorderConfig {
            port: 0,
            target: "https://secure.example.com".to_string(),
            log_path: dir.path().join("capture.log"),
        };

        assert!(recorder.start(config).await.is_err());
        assert!(!recorder.is_running());
    }

    #[test]
    fn test_strip_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));

        strip_hop_headers(&mut headers);

        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("transfer-encoding"));
        assert!(headers.contains_key("x-custom"));
    }
}
