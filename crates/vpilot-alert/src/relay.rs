//! Fire-and-forget forwarding of simulator events.
//!
//! The simulator calls [`EventRelay::on_event`] from its own callback thread.
//! The call only schedules the POST and returns; a failed POST is logged
//! once and forgotten.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::AlertEvent;
use crate::server::AlertServer;

/// Counts of relay attempts since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Events the server accepted.
    pub relayed: u64,
    /// Events dropped after a transport failure.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    relayed: AtomicU64,
    failed: AtomicU64,
}

/// Forwards [`AlertEvent`]s to the server without blocking the caller.
#[derive(Clone)]
pub struct EventRelay {
    server: Arc<dyn AlertServer>,
    runtime: Handle,
    counters: Arc<Counters>,
}

impl fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRelay")
            .field("server", &self.server.base_url())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventRelay {
    /// Create a relay posting to `server`, with requests running on `runtime`.
    #[must_use]
    pub fn new(server: Arc<dyn AlertServer>, runtime: Handle) -> Self {
        Self {
            server,
            runtime,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Schedule `event` for relay and return at once.
    ///
    /// Safe to call from any thread, including ones outside the runtime.
    /// The returned handle may be dropped; the request still runs.
    pub fn on_event(&self, event: AlertEvent) -> JoinHandle<()> {
        let relay = self.clone();
        self.runtime.spawn(async move {
            // Already logged and counted
            let _ = relay.relay(&event).await;
        })
    }

    /// Post `event` and wait for the answer. Failures are logged and counted.
    ///
    /// # Errors
    ///
    /// Returns the transport error; callers on the simulator path drop it.
    pub async fn relay(&self, event: &AlertEvent) -> Result<()> {
        let endpoint = event.endpoint();
        match self.server.relay_event(event).await {
            Ok(()) => {
                self.counters.relayed.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint, from = event.sender(), "Relay succeeded");
                Ok(())
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(endpoint, from = event.sender(), error = %e, "Event not relayed");
                Err(e)
            }
        }
    }

    /// Snapshot of the relay counters.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            relayed: self.counters.relayed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
