//! Turning a push delivery into an alarm.
//!
//! A push may be handled by the foreground app or by a process that was just
//! started for it, so nothing here trusts memory from an earlier delivery.
//! Server address and selected sound are re-read from the device store on
//! every call. Pushes arrive at least once; duplicates while the alarm sounds
//! do nothing.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{AlarmAudioEngine, SilentOutput};
use crate::event::AlarmTriggerPayload;
use crate::server::{AlertServer, ServerConnector};
use crate::storage::{DeviceRegistration, DeviceStore};

/// What a push delivery did to the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmDecision {
    /// The payload did not ask for the alarm.
    NotTriggered,
    /// An alarm loop was already sounding.
    AlreadySounding,
    /// The device store could not be read.
    StoreUnavailable,
    /// No sound is selected, so nothing plays.
    NoSoundSelected,
    /// The selected sound could not be played.
    LoadFailed,
    /// The alarm loop started.
    Started,
}

/// Result of handling one delivery.
#[derive(Debug)]
pub struct DispatchOutcome {
    /// What happened to the alarm.
    pub decision: AlarmDecision,
    /// The "alarm started" notice to the server, if one was sent.
    pub server_notice: Option<JoinHandle<()>>,
}

impl DispatchOutcome {
    fn quiet(decision: AlarmDecision) -> Self {
        Self {
            decision,
            server_notice: None,
        }
    }

    /// Wait for the server notice to finish and return the decision.
    pub async fn settle(self) -> AlarmDecision {
        if let Some(notice) = self.server_notice {
            let _ = notice.await;
        }
        self.decision
    }
}

/// Handles push deliveries and the pilot's stop action.
#[derive(Clone)]
pub struct NotificationDispatch {
    engine: AlarmAudioEngine,
    store_path: PathBuf,
    connector: Arc<dyn ServerConnector>,
    runtime: Handle,
}

impl fmt::Debug for NotificationDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatch")
            .field("engine", &self.engine)
            .field("store_path", &self.store_path)
            .finish_non_exhaustive()
    }
}

impl NotificationDispatch {
    /// Create a dispatcher. Server notices run on `runtime`.
    #[must_use]
    pub fn new(
        engine: AlarmAudioEngine,
        store_path: impl Into<PathBuf>,
        connector: Arc<dyn ServerConnector>,
        runtime: Handle,
    ) -> Self {
        Self {
            engine,
            store_path: store_path.into(),
            connector,
            runtime,
        }
    }

    /// A dispatcher that only talks to the server.
    ///
    /// For processes that never play the alarm themselves, such as a
    /// one-shot "stop alarm" command. No audio device is opened, so a
    /// missing sound card cannot keep the server from being told.
    #[must_use]
    pub fn without_audio(
        store_path: impl Into<PathBuf>,
        connector: Arc<dyn ServerConnector>,
        runtime: Handle,
    ) -> Self {
        let engine = AlarmAudioEngine::new(Box::new(SilentOutput::new()), runtime.clone());
        Self::new(engine, store_path, connector, runtime)
    }

    /// The engine alarms are played on.
    #[must_use]
    pub fn engine(&self) -> &AlarmAudioEngine {
        &self.engine
    }

    /// Handle one push payload.
    ///
    /// Never fails. The server notice is sent in the background; callers
    /// that need it finished can [`settle`](DispatchOutcome::settle) the outcome.
    pub fn handle(&self, payload: &str) -> DispatchOutcome {
        let Some(payload) = AlarmTriggerPayload::parse(payload) else {
            debug!("Ignoring unreadable push payload");
            return DispatchOutcome::quiet(AlarmDecision::NotTriggered);
        };
        if !payload.should_trigger() {
            debug!("Push does not ask for the alarm");
            return DispatchOutcome::quiet(AlarmDecision::NotTriggered);
        }

        if self.engine.is_alarm_active() {
            debug!("Duplicate trigger while alarm sounds");
            return DispatchOutcome::quiet(AlarmDecision::AlreadySounding);
        }

        let registration = match self.read_registration() {
            Ok(registration) => registration,
            Err(e) => {
                warn!(error = %e, "Cannot read device store, alarm not started");
                return DispatchOutcome::quiet(AlarmDecision::StoreUnavailable);
            }
        };

        let server_notice = registration
            .server_address
            .as_deref()
            .and_then(|address| self.notify_alarm_started(address));

        let decision = match registration.selected_sound.as_deref() {
            None => {
                info!("Alarm triggered but no sound is selected");
                AlarmDecision::NoSoundSelected
            }
            Some(sound) => match self.engine.start_alarm(sound) {
                Ok(true) => AlarmDecision::Started,
                Ok(false) => AlarmDecision::AlreadySounding,
                // Already logged by the engine
                Err(_) => AlarmDecision::LoadFailed,
            },
        };

        DispatchOutcome {
            decision,
            server_notice,
        }
    }

    /// The pilot pressed "Stop Alarm": silence the device, then tell the server.
    ///
    /// Returns `true` if the server acknowledged.
    pub async fn acknowledge(&self) -> bool {
        self.engine.stop();

        let address = match self.read_registration() {
            Ok(registration) => registration.server_address,
            Err(e) => {
                warn!(error = %e, "Cannot read device store, server not told");
                return false;
            }
        };
        let Some(address) = address else {
            debug!("No server address, alarm stopped locally only");
            return false;
        };

        let Some(server) = self.connect(&address) else {
            return false;
        };
        match server.alarm_stopped().await {
            Ok(()) => {
                info!("Server told the alarm was stopped");
                true
            }
            Err(e) => {
                warn!(error = %e, "Server not told the alarm was stopped");
                false
            }
        }
    }

    fn read_registration(&self) -> crate::Result<DeviceRegistration> {
        DeviceStore::open(&self.store_path)?.registration()
    }

    fn connect(&self, address: &str) -> Option<Arc<dyn AlertServer>> {
        match self.connector.connect(address) {
            Ok(server) => Some(server),
            Err(e) => {
                warn!(server = address, error = %e, "Stored server address unusable");
                None
            }
        }
    }

    fn notify_alarm_started(&self, address: &str) -> Option<JoinHandle<()>> {
        let server = self.connect(address)?;
        Some(self.runtime.spawn(async move {
            match server.alarm_started().await {
                Ok(()) => debug!("Server told the alarm started"),
                Err(e) => warn!(error = %e, "Server not told the alarm started"),
            }
        }))
    }
}
