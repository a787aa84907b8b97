//! The device's alarm audio engine.
//!
//! [`AlarmAudioEngine`] owns the one audio output the device has and keeps
//! at most one playback session on it. Starting anything stops what was
//! playing first. Alarms loop until stopped; previews stop themselves after a
//! bound.

mod silent;

#[cfg(feature = "rodio")]
mod rodio_output;

pub use silent::SilentOutput;

#[cfg(feature = "rodio")]
pub use rodio_output::RodioOutput;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;

/// A device that can play one sound at a time.
///
/// Implementations hold at most one open resource. The engine always calls
/// [`AudioOutput::release`] before opening the next one.
pub trait AudioOutput: Send {
    /// Open `uri` and start playing it, repeating forever when `looped`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AudioLoad`] if the sound cannot be opened or decoded.
    fn open(&mut self, uri: &str, looped: bool) -> Result<()>;

    /// Stop playback and release whatever `open` acquired.
    fn release(&mut self);
}

/// Lifecycle of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing has been played yet.
    Idle,
    /// The resource is being opened.
    Loading,
    /// Sound is coming out.
    Playing,
    /// Playback ended and the resource was released.
    Stopped,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Playing => write!(f, "playing"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The current (or last) playback session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackHandle {
    id: u64,
    uri: String,
    looped: bool,
    state: PlaybackState,
}

impl PlaybackHandle {
    /// Sound being played.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// `true` for an alarm loop, `false` for a preview.
    #[must_use]
    pub fn looped(&self) -> bool {
        self.looped
    }

    /// Where the session is in its lifecycle.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    fn is_live(&self) -> bool {
        matches!(self.state, PlaybackState::Loading | PlaybackState::Playing)
    }
}

struct EngineState {
    output: Box<dyn AudioOutput>,
    handle: Option<PlaybackHandle>,
    next_id: u64,
    auto_stop: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<EngineState>,
    // Mirrors of the handle state, readable without taking the lock
    playing: AtomicBool,
    looping: AtomicBool,
    runtime: Handle,
}

/// Single-channel alarm player.
///
/// Cloning is cheap and every clone drives the same output. Start and stop
/// run under one lock, so two triggers racing each other still leave exactly
/// one session.
#[derive(Clone)]
pub struct AlarmAudioEngine {
    inner: Arc<Inner>,
}

impl fmt::Debug for AlarmAudioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmAudioEngine")
            .field("playing", &self.is_active())
            .field("looping", &self.is_alarm_active())
            .finish_non_exhaustive()
    }
}

impl AlarmAudioEngine {
    /// Create an engine over `output`. Preview timers run on `runtime`.
    #[must_use]
    pub fn new(output: Box<dyn AudioOutput>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(EngineState {
                    output,
                    handle: None,
                    next_id: 0,
                    auto_stop: None,
                }),
                playing: AtomicBool::new(false),
                looping: AtomicBool::new(false),
                runtime,
            }),
        }
    }

    /// Stop whatever is playing, then loop `uri` until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AudioLoad`] if `uri` cannot be opened. The
    /// engine is left stopped.
    pub fn start_loop(&self, uri: &str) -> Result<()> {
        let mut state = self.lock();
        self.start_locked(&mut state, uri, true)?;
        Ok(())
    }

    /// Start the alarm loop unless an alarm loop is already sounding.
    ///
    /// The check and the start happen under the same lock. A running preview
    /// does not count and is replaced. Returns `true` if a loop was started.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AudioLoad`] if `uri` cannot be opened.
    pub fn start_alarm(&self, uri: &str) -> Result<bool> {
        let mut state = self.lock();
        let sounding = state
            .handle
            .as_ref()
            .is_some_and(|h| h.looped && h.state == PlaybackState::Playing);
        if sounding {
            debug!("Alarm already sounding");
            return Ok(false);
        }
        self.start_locked(&mut state, uri, true)?;
        Ok(true)
    }

    /// Play `uri` once and stop it after `bound` even if nobody calls stop.
    ///
    /// An explicit [`stop`](Self::stop) or any later start cancels the timer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AudioLoad`] if `uri` cannot be opened.
    pub fn preview(&self, uri: &str, bound: Duration) -> Result<()> {
        let mut state = self.lock();
        let id = self.start_locked(&mut state, uri, false)?;

        let engine = Arc::downgrade(&self.inner);
        state.auto_stop = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(bound).await;
            expire_preview(&engine, id);
        }));
        debug!(uri, bound_ms = bound.as_millis(), "Preview scheduled to stop");
        Ok(())
    }

    /// Stop playback and release the output.
    ///
    /// Does nothing when nothing is playing.
    pub fn stop(&self) {
        let mut state = self.lock();
        if self.stop_locked(&mut state) {
            info!("Playback stopped");
        }
    }

    /// Whether anything is playing. Never blocks.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.playing.load(Ordering::Acquire)
    }

    /// Whether an alarm loop (not a preview) is playing. Never blocks.
    #[must_use]
    pub fn is_alarm_active(&self) -> bool {
        self.inner.looping.load(Ordering::Acquire)
    }

    /// State of the current session, `Idle` if there never was one.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.lock()
            .handle
            .as_ref()
            .map_or(PlaybackState::Idle, PlaybackHandle::state)
    }

    /// Sound currently playing, if any.
    #[must_use]
    pub fn current_uri(&self) -> Option<String> {
        self.lock()
            .handle
            .as_ref()
            .filter(|h| h.is_live())
            .map(|h| h.uri.clone())
    }

    /// Snapshot of the current or last session.
    #[must_use]
    pub fn handle(&self) -> Option<PlaybackHandle> {
        self.lock().handle.clone()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        lock_state(&self.inner)
    }

    /// Stop-then-start. Caller holds the lock for the whole sequence.
    fn start_locked(&self, state: &mut EngineState, uri: &str, looped: bool) -> Result<u64> {
        self.stop_locked(state);

        state.next_id += 1;
        let id = state.next_id;
        state.handle = Some(PlaybackHandle {
            id,
            uri: uri.to_string(),
            looped,
            state: PlaybackState::Loading,
        });

        let opened = state.output.open(uri, looped);
        let Some(handle) = state.handle.as_mut() else {
            return Err(crate::Error::internal("playback handle vanished"));
        };

        match opened {
            Ok(()) => {
                handle.state = PlaybackState::Playing;
                self.inner.playing.store(true, Ordering::Release);
                self.inner.looping.store(looped, Ordering::Release);
                info!(uri, looped, "Playback started");
                Ok(id)
            }
            Err(e) => {
                handle.state = PlaybackState::Stopped;
                warn!(uri, error = %e, "Cannot play sound");
                Err(e)
            }
        }
    }

    /// Returns `true` if something was actually stopped.
    fn stop_locked(&self, state: &mut EngineState) -> bool {
        if let Some(timer) = state.auto_stop.take() {
            timer.abort();
        }
        release_locked(&self.inner, state)
    }
}

fn lock_state(inner: &Inner) -> MutexGuard<'_, EngineState> {
    // A panic inside an output must not take the alarm down with it
    inner.state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn release_locked(inner: &Inner, state: &mut EngineState) -> bool {
    let Some(handle) = state.handle.as_mut().filter(|h| h.is_live()) else {
        return false;
    };
    state.output.release();
    handle.state = PlaybackState::Stopped;
    inner.playing.store(false, Ordering::Release);
    inner.looping.store(false, Ordering::Release);
    true
}

/// Auto-stop for preview `id`. Ignored if another session took over.
fn expire_preview(engine: &Weak<Inner>, id: u64) {
    let Some(inner) = engine.upgrade() else {
        return;
    };
    let mut state = lock_state(&inner);
    if state.handle.as_ref().is_some_and(|h| h.id == id) {
        // This task is the timer; drop its handle instead of aborting itself
        state.auto_stop = None;
        if release_locked(&inner, &mut state) {
            info!("Preview finished");
        }
    }
}

/// The output for this build: speakers with the `rodio` feature, silent otherwise.
///
/// # Errors
///
/// Returns [`crate::Error::AudioDevice`] if the sound device cannot be opened.
pub fn default_output() -> Result<Box<dyn AudioOutput>> {
    #[cfg(feature = "rodio")]
    {
        Ok(Box::new(RodioOutput::new()?))
    }
    #[cfg(not(feature = "rodio"))]
    {
        Ok(Box::new(SilentOutput::new()))
    }
}
