//! `vpilot-alert` - Wake the pilot when the frequency calls
//!
//! This library links a flight-simulation client, a remote alert server and
//! a handheld device. The simulator side relays events and polls a "stay
//! connected" signal; the device side turns push notifications into exactly
//! one looping alarm.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod audio;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod logging;
pub mod registration;
pub mod relay;
pub mod safety;
pub mod server;
pub mod storage;

#[cfg(test)]
mod testing;

pub use audio::{AlarmAudioEngine, AudioOutput, PlaybackState};
pub use config::Config;
pub use dispatch::{AlarmDecision, NotificationDispatch};
pub use error::{Error, Result};
pub use event::{AlarmTriggerPayload, AlertEvent, ConnectionSignal};
pub use logging::init_logging;
pub use registration::{Registrar, RegistrationReport};
pub use relay::{EventRelay, RelayStats};
pub use safety::{SafetyPoll, SimulatorSession, TickOutcome};
pub use server::{AlertServer, HttpConnector, HttpServer, ServerConnector};
pub use storage::{DeviceRegistration, DeviceStore};
