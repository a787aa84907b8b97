//! The disconnect safety net.
//!
//! [`SafetyPoll`] asks the server on a fixed period whether the simulator
//! session should stay online. A `false` answer makes it ask the simulator to
//! disconnect. Transport trouble is "unknown" and never disconnects.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::server::AlertServer;

/// The simulator's side of the session.
pub trait SimulatorSession: Send + Sync {
    /// Ask the simulator to drop its network session.
    ///
    /// Must return promptly; the simulator performs the disconnect on its own time.
    fn request_disconnect(&self);
}

/// What one poll concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    /// The server wants the session kept.
    KeepConnected,
    /// The server said no and a disconnect was requested.
    DisconnectRequested,
    /// The server could not be asked or gave an unreadable answer.
    Unknown,
}

/// Connection-safety state of the plugin.
///
/// There is no way back to `Connected` from here; reconnecting is the pilot's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionSafety {
    /// No disconnect has been requested.
    Connected,
    /// At least one disconnect has been requested.
    DisconnectRequested,
}

struct PollInner {
    server: Arc<dyn AlertServer>,
    session: Arc<dyn SimulatorSession>,
    interval: Duration,
    disconnect_requested: AtomicBool,
    requests: AtomicU64,
}

/// Shortest time between polls.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodic connection-status poll.
#[derive(Clone)]
pub struct SafetyPoll {
    inner: Arc<PollInner>,
}

impl fmt::Debug for SafetyPoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyPoll")
            .field("server", &self.inner.server.base_url())
            .field("interval", &self.inner.interval)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SafetyPoll {
    /// Create a poll against `server` that disconnects `session`.
    ///
    /// An interval shorter than [`MIN_INTERVAL`] is raised to it.
    #[must_use]
    pub fn new(
        server: Arc<dyn AlertServer>,
        session: Arc<dyn SimulatorSession>,
        interval: Duration,
    ) -> Self {
        if interval < MIN_INTERVAL {
            warn!(
                requested_ms = interval.as_millis(),
                "Poll interval too short, using the minimum"
            );
        }
        let interval = interval.max(MIN_INTERVAL);
        Self {
            inner: Arc::new(PollInner {
                server,
                session,
                interval,
                disconnect_requested: AtomicBool::new(false),
                requests: AtomicU64::new(0),
            }),
        }
    }

    /// Time between polls.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Run one poll.
    ///
    /// Each `false` answer requests a disconnect, including when an earlier
    /// tick already did.
    pub async fn tick(&self) -> TickOutcome {
        let signal = match self.inner.server.connection_status().await {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "Connection status unknown");
                return TickOutcome::Unknown;
            }
        };

        if signal.keep_connected() {
            trace!("Server wants the session kept");
            return TickOutcome::KeepConnected;
        }

        let count = self.inner.requests.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .disconnect_requested
            .store(true, Ordering::SeqCst);
        warn!(count, "Server asked for a disconnect, disconnecting simulator");
        self.inner.session.request_disconnect();
        TickOutcome::DisconnectRequested
    }

    /// Start polling on `runtime`. The first poll happens one interval from now.
    #[must_use]
    pub fn spawn(&self, runtime: &Handle) -> SafetyPollHandle {
        let poll = self.clone();
        let period = self.interval();
        info!(interval_secs = period.as_secs_f64(), "Safety poll started");

        let task = runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                poll.tick().await;
            }
        });

        SafetyPollHandle { task }
    }

    /// Whether a disconnect has been requested.
    #[must_use]
    pub fn state(&self) -> ConnectionSafety {
        if self.inner.disconnect_requested.load(Ordering::SeqCst) {
            ConnectionSafety::DisconnectRequested
        } else {
            ConnectionSafety::Connected
        }
    }

    /// How many disconnect requests were issued.
    #[must_use]
    pub fn disconnect_requests(&self) -> u64 {
        self.inner.requests.load(Ordering::SeqCst)
    }
}

/// Owns the running poll task. Dropping it stops the poll.
#[derive(Debug)]
pub struct SafetyPollHandle {
    task: JoinHandle<()>,
}

impl SafetyPollHandle {
    /// Stop polling.
    pub fn stop(&self) {
        if !self.task.is_finished() {
            self.task.abort();
            debug!("Safety poll stopped");
        }
    }

    /// Whether the poll task is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SafetyPollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeServer, RecordingSession};

    const PERIOD: Duration = Duration::from_secs(5);

    fn poll_with(server: &Arc<FakeServer>, session: &Arc<RecordingSession>) -> SafetyPoll {
        SafetyPoll::new(server.clone(), session.clone(), PERIOD)
    }

    #[tokio::test]
    async fn test_true_keeps_connected() {
        let server = FakeServer::new();
        let session = Arc::new(RecordingSession::default());
        let poll = poll_with(&server, &session);

        server.queue_signals([Some(true)]);
        assert_eq!(poll.tick().await, TickOutcome::KeepConnected);
        assert_eq!(session.disconnects(), 0);
        assert_eq!(poll.state(), ConnectionSafety::Connected);
    }

    #[tokio::test]
    async fn test_false_requests_disconnect() {
        let server = FakeServer::new();
        let session = Arc::new(RecordingSession::default());
        let poll = poll_with(&server, &session);

        server.queue_signals([Some(false)]);
        assert_eq!(poll.tick().await, TickOutcome::DisconnectRequested);
        assert_eq!(session.disconnects(), 1);
        assert_eq!(poll.state(), ConnectionSafety::DisconnectRequested);
    }

    #[tokio::test]
    async fn test_transport_error_is_unknown() {
        let server = FakeServer::new();
        let session = Arc::new(RecordingSession::default());
        let poll = poll_with(&server, &session);

        server.queue_signals([None]);
        assert_eq!(poll.tick().await, TickOutcome::Unknown);

        server.fail_all(true);
        assert_eq!(poll.tick().await, TickOutcome::Unknown);

        assert_eq!(session.disconnects(), 0);
        assert_eq!(poll.state(), ConnectionSafety::Connected);
    }

    #[tokio::test]
    async fn test_no_way_back_to_connected() {
        let server = FakeServer::new();
        let session = Arc::new(RecordingSession::default());
        let poll = poll_with(&server, &session);

        server.queue_signals([Some(false), Some(true), Some(true)]);
        poll.tick().await;
        poll.tick().await;
        poll.tick().await;

        assert_eq!(poll.state(), ConnectionSafety::DisconnectRequested);
        assert_eq!(poll.disconnect_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_false_ticks_request_five_disconnects() {
        let server = FakeServer::new();
        let session = Arc::new(RecordingSession::default());
        let poll = poll_with(&server, &session);

        server.queue_signals([Some(false); 5]);
        let handle = poll.spawn(&Handle::current());

        time::sleep(Duration::from_secs(26)).await;

        // Repeated false answers are not suppressed
        assert_eq!(session.disconnects(), 5);
        assert_eq!(poll.disconnect_requests(), 5);
        assert!(handle.is_running());
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_after_one_interval() {
        let server = FakeServer::new();
        let session = Arc::new(RecordingSession::default());
        let handle = poll_with(&server, &session).spawn(&Handle::current());

        time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(server.count("connection-status"), 0);

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.count("connection-status"), 1);
        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_period_through_failures() {
        let server = FakeServer::new();
        server.fail_all(true);
        let session = Arc::new(RecordingSession::default());
        let handle = poll_with(&server, &session).spawn(&Handle::current());

        time::sleep(Duration::from_secs(31)).await;

        assert_eq!(server.count("connection-status"), 6);
        assert_eq!(session.disconnects(), 0);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_polling() {
        let server = FakeServer::new();
        let session = Arc::new(RecordingSession::default());
        let handle = poll_with(&server, &session).spawn(&Handle::current());

        time::sleep(Duration::from_secs(11)).await;
        handle.stop();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_running());

        let polls = server.count("connection-status");
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(server.count("connection-status"), polls);
    }

    #[test]
    fn test_interval_kept() {
        let poll = poll_with(&FakeServer::new(), &Arc::new(RecordingSession::default()));
        assert_eq!(poll.interval(), PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_raised_and_keeps_running() {
        let server = FakeServer::new();
        let session = Arc::new(RecordingSession::default());
        let poll = SafetyPoll::new(server.clone(), session, Duration::ZERO);
        assert_eq!(poll.interval(), MIN_INTERVAL);

        let handle = poll.spawn(&Handle::current());
        time::sleep(Duration::from_millis(10)).await;

        assert!(handle.is_running());
        assert!(server.count("connection-status") >= 1);
        handle.stop();
    }
}
