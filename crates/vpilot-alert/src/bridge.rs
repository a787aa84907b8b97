//! Line protocols between the binary and its surroundings.
//!
//! The simulator shim writes one `kind`-tagged JSON event per line to the
//! plugin's stdin and reads `{"command":"disconnect"}` lines from its stdout.
//! The push channel writes one payload per line to the device listener; the
//! line `stop` is the pilot's "Stop Alarm". Bad lines are logged and skipped.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::dispatch::NotificationDispatch;
use crate::error::Result;
use crate::event::AlertEvent;
use crate::relay::EventRelay;
use crate::safety::SimulatorSession;

/// Line that acknowledges the alarm on the device bridge.
pub const STOP_COMMAND: &str = "stop";

/// Message the plugin sends the simulator shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ShimCommand {
    /// Drop the network session.
    Disconnect,
}

/// [`SimulatorSession`] that writes shim commands as JSON lines.
#[derive(Debug)]
pub struct LineSession<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> LineSession<W> {
    /// Write commands to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn send(&self, command: ShimCommand) -> Result<()> {
        let line = serde_json::to_string(&command)?;
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl LineSession<std::io::Stdout> {
    /// Session talking to the shim over this process's stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> SimulatorSession for LineSession<W> {
    fn request_disconnect(&self) {
        if let Err(e) = self.send(ShimCommand::Disconnect) {
            error!(error = %e, "Cannot send disconnect to simulator");
        }
    }
}

/// Counts for one bridge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Non-empty lines read.
    pub lines: u64,
    /// Lines acted on.
    pub accepted: u64,
    /// Lines that could not be understood.
    pub skipped: u64,
}

/// Feed simulator events from `input` into `relay` until end of input.
///
/// Waits for relays still in flight before returning.
///
/// # Errors
///
/// Returns an error only if reading `input` fails.
pub async fn run_plugin<R>(input: R, relay: &EventRelay) -> Result<BridgeStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut stats = BridgeStats::default();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        match serde_json::from_str::<AlertEvent>(line) {
            Ok(event) => {
                debug!(endpoint = event.endpoint(), "Event from simulator");
                in_flight.retain(|task| !task.is_finished());
                in_flight.push(relay.on_event(event));
                stats.accepted += 1;
            }
            Err(e) => {
                warn!(error = %e, "Skipping unreadable simulator event");
                stats.skipped += 1;
            }
        }
    }

    for task in in_flight {
        let _ = task.await;
    }
    debug!(?stats, "Simulator input closed");
    Ok(stats)
}

/// Feed push payloads from `input` into `dispatch` until end of input.
///
/// # Errors
///
/// Returns an error only if reading `input` fails.
pub async fn run_device<R>(input: R, dispatch: &NotificationDispatch) -> Result<BridgeStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut stats = BridgeStats::default();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines += 1;

        if line.eq_ignore_ascii_case(STOP_COMMAND) {
            dispatch.acknowledge().await;
            stats.accepted += 1;
            continue;
        }

        let outcome = dispatch.handle(line);
        debug!(decision = ?outcome.decision, "Push handled");
        if let Some(notice) = outcome.server_notice {
            in_flight.retain(|task| !task.is_finished());
            in_flight.push(notice);
        }
        stats.accepted += 1;
    }

    for task in in_flight {
        let _ = task.await;
    }
    debug!(?stats, "Push input closed");
    Ok(stats)
}
