//! Test doubles shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::Router;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::audio::AudioOutput;
use crate::config::validate_server_url;
use crate::error::{Error, Result};
use crate::event::{AlertEvent, ConnectionSignal, NotificationRecord};
use crate::safety::SimulatorSession;
use crate::server::{AlertServer, ServerConnector};

// === HTTP ===

/// A request seen by [`MockHttpServer`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Debug)]
struct MockState {
    requests: Mutex<Vec<RecordedRequest>>,
    reply: Mutex<(StatusCode, String)>,
}

/// An axum server on 127.0.0.1 that records every request and answers all
/// of them with one configurable reply (default `200 true`).
#[derive(Debug)]
pub(crate) struct MockHttpServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockHttpServer {
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new((StatusCode::OK, "true".to_string())),
        });
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/vpilot-alert/api", self.addr)
    }

    pub fn respond_with(&self, status: StatusCode, body: &str) {
        *self.state.reply.lock().unwrap() = (status, body.to_string());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn record(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    body: String,
) -> (StatusCode, String) {
    state.requests.lock().unwrap().push(RecordedRequest {
        method,
        path: uri.path().to_string(),
        body,
    });
    state.reply.lock().unwrap().clone()
}

// === Server ===

/// In-memory [`AlertServer`] recording calls by name.
#[derive(Debug, Default)]
pub(crate) struct FakeServer {
    calls: Mutex<Vec<String>>,
    signals: Mutex<VecDeque<Option<bool>>>,
    failing: AtomicBool,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call fail with HTTP 500.
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Queue answers for `connection_status`; `None` is a transport failure.
    /// Once the queue is empty the answer is `true`.
    pub fn queue_signals(&self, signals: impl IntoIterator<Item = Option<bool>>) {
        self.signals.lock().unwrap().extend(signals);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    fn record(&self, endpoint: &str) -> Result<()> {
        self.calls.lock().unwrap().push(endpoint.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::HttpStatus {
                endpoint: endpoint.to_string(),
                status: 500,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AlertServer for FakeServer {
    fn base_url(&self) -> &str {
        "http://fake/vpilot-alert/api"
    }

    async fn relay_event(&self, event: &AlertEvent) -> Result<()> {
        self.record(event.endpoint())
    }

    async fn connection_status(&self) -> Result<ConnectionSignal> {
        self.record("connection-status")?;
        match self.signals.lock().unwrap().pop_front() {
            Some(Some(keep)) => Ok(ConnectionSignal::new(keep)),
            Some(None) => Err(Error::HttpStatus {
                endpoint: "connection-status".to_string(),
                status: 503,
            }),
            None => Ok(ConnectionSignal::new(true)),
        }
    }

    async fn register_token(&self, token: &str) -> Result<()> {
        self.record(&format!("fcm-token:{token}"))
    }

    async fn alarm_started(&self) -> Result<()> {
        self.record("alarm-started")
    }

    async fn alarm_stopped(&self) -> Result<()> {
        self.record("alarm-stopped")
    }

    async fn probe(&self) -> Result<()> {
        self.record("probe")
    }

    async fn notifications(&self) -> Result<Vec<NotificationRecord>> {
        self.record("notifications")?;
        Ok(Vec::new())
    }

    async fn force_disconnect(&self) -> Result<()> {
        self.record("force-disconnect")
    }
}

/// Hands out one shared [`FakeServer`] and remembers the addresses asked for.
#[derive(Debug)]
pub(crate) struct FakeConnector {
    pub server: Arc<FakeServer>,
    addresses: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new(server: Arc<FakeServer>) -> Arc<Self> {
        Arc::new(Self {
            server,
            addresses: Mutex::new(Vec::new()),
        })
    }

    pub fn addresses(&self) -> Vec<String> {
        self.addresses.lock().unwrap().clone()
    }
}

impl ServerConnector for FakeConnector {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn AlertServer>> {
        validate_server_url(base_url)?;
        self.addresses.lock().unwrap().push(base_url.to_string());
        let server: Arc<dyn AlertServer> = self.server.clone();
        Ok(server)
    }
}

// === Simulator ===

/// Counts disconnect requests.
#[derive(Debug, Default)]
pub(crate) struct RecordingSession {
    disconnects: AtomicUsize,
}

impl RecordingSession {
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl SimulatorSession for RecordingSession {
    fn request_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

// === Audio ===

#[derive(Debug, Default)]
struct OutputLog {
    opened: Vec<(String, bool)>,
    released: usize,
    open_now: usize,
    max_open: usize,
    unopenable: HashSet<String>,
}

/// [`AudioOutput`] that tracks how many resources are open at once.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingOutput {
    log: Arc<Mutex<OutputLog>>,
}

impl RecordingOutput {
    pub fn make_unopenable(&self, uri: &str) {
        self.log.lock().unwrap().unopenable.insert(uri.to_string());
    }

    pub fn opened(&self) -> Vec<(String, bool)> {
        self.log.lock().unwrap().opened.clone()
    }

    pub fn released(&self) -> usize {
        self.log.lock().unwrap().released
    }

    pub fn open_now(&self) -> usize {
        self.log.lock().unwrap().open_now
    }

    pub fn max_open(&self) -> usize {
        self.log.lock().unwrap().max_open
    }
}

impl AudioOutput for RecordingOutput {
    fn open(&mut self, uri: &str, looped: bool) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.unopenable.contains(uri) {
            return Err(Error::audio_load(uri, "unopenable"));
        }
        log.opened.push((uri.to_string(), looped));
        log.open_now += 1;
        log.max_open = log.max_open.max(log.open_now);
        Ok(())
    }

    fn release(&mut self) {
        let mut log = self.log.lock().unwrap();
        assert!(log.open_now > 0, "release without an open resource");
        log.open_now -= 1;
        log.released += 1;
    }
}

// === Logging ===

/// Collects formatted log output for the current thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's events into the capture until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Lines logged at `level` (e.g. `"WARN"`).
    pub fn count(&self, level: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.split_whitespace().nth(1) == Some(level))
            .count()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
