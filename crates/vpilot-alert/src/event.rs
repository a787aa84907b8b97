//! Messages exchanged between the simulator, the alert server and the device.
//!
//! Simulator events are relayed as one of three [`AlertEvent`] variants, the
//! server wakes the device with an [`AlarmTriggerPayload`], and the plugin
//! asks whether to stay online through a [`ConnectionSignal`].

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// A radio frequency in kHz, as reported by the simulator client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frequency(pub u32);

impl Frequency {
    /// The frequency in kHz.
    #[must_use]
    pub fn khz(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let khz = self.khz();
        write!(f, "{}.{:03}", khz / 1000, khz % 1000)
    }
}

/// A private (text) message addressed to the pilot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    /// Sender callsign.
    pub from: String,
    /// Message text.
    pub message: String,
}

/// A radio transmission received on one or more tuned frequencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioMessage {
    /// Frequencies the transmission was heard on.
    pub frequencies: BTreeSet<Frequency>,
    /// Sender callsign.
    pub from: String,
    /// Transmitted text.
    pub message: String,
}

/// A SELCAL chime addressed to the aircraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelcalAlert {
    /// Frequencies the call arrived on.
    pub frequencies: BTreeSet<Frequency>,
    /// Calling station.
    pub from: String,
}

/// An event raised inside the simulator client that may need the pilot.
///
/// Created when the simulator fires the callback and consumed once by the
/// relay. The serde form is the `kind`-tagged line the simulator bridge
/// reads; [`AlertEvent::body`] gives the body the server expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertEvent {
    /// A private message.
    PrivateMessage(PrivateMessage),
    /// A radio message; the server decides whether it mentions our callsign.
    RadioMessage(RadioMessage),
    /// A SELCAL alert.
    SelcalAlert(SelcalAlert),
}

impl AlertEvent {
    /// Build a private message event.
    #[must_use]
    pub fn private_message(from: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PrivateMessage(PrivateMessage {
            from: from.into(),
            message: message.into(),
        })
    }

    /// Build a radio message event.
    #[must_use]
    pub fn radio_message(
        frequencies: impl IntoIterator<Item = u32>,
        from: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RadioMessage(RadioMessage {
            frequencies: frequencies.into_iter().map(Frequency).collect(),
            from: from.into(),
            message: message.into(),
        })
    }

    /// Build a SELCAL event.
    #[must_use]
    pub fn selcal(frequencies: impl IntoIterator<Item = u32>, from: impl Into<String>) -> Self {
        Self::SelcalAlert(SelcalAlert {
            frequencies: frequencies.into_iter().map(Frequency).collect(),
            from: from.into(),
        })
    }

    /// Server endpoint, relative to the base address, for this variant.
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::PrivateMessage(_) => "private-message",
            Self::RadioMessage(_) => "radio-message",
            Self::SelcalAlert(_) => "selcal",
        }
    }

    /// Callsign of whoever caused the event.
    #[must_use]
    pub fn sender(&self) -> &str {
        match self {
            Self::PrivateMessage(m) => &m.from,
            Self::RadioMessage(m) => &m.from,
            Self::SelcalAlert(m) => &m.from,
        }
    }

    /// JSON body posted to [`AlertEvent::endpoint`].
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::PrivateMessage(m) => json!({ "from": m.from, "message": m.message }),
            Self::RadioMessage(m) => json!({
                "frequencies": m.frequencies,
                "from": m.from,
                "message": m.message,
            }),
            Self::SelcalAlert(m) => json!({ "frequencies": m.frequencies, "from": m.from }),
        }
    }
}

/// Data carried by the push notification that wakes the device.
///
/// Push data values travel as strings, so the server sends
/// `{"triggerAlarm": "true"}`. Both that form and a plain JSON boolean are
/// accepted; any other value means "do not trigger".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmTriggerPayload {
    /// Whether the alarm should sound.
    #[serde(default, deserialize_with = "lenient_flag")]
    pub trigger_alarm: bool,
}

impl AlarmTriggerPayload {
    /// Parse a raw push payload. Returns `None` when it is not a JSON object.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// Whether this payload asks for the alarm.
    #[must_use]
    pub fn should_trigger(&self) -> bool {
        self.trigger_alarm
    }
}

fn lenient_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// The server's answer to "should the session remain connected".
///
/// Read fresh on every poll and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSignal {
    keep_connected: bool,
}

impl ConnectionSignal {
    /// Create a signal from its boolean value.
    #[must_use]
    pub fn new(keep_connected: bool) -> Self {
        Self { keep_connected }
    }

    /// Parse the bare-boolean response body of `connection-status`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignal`] if the body is not `true` or `false`.
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str::<bool>(body.trim())
            .map(Self::new)
            .map_err(|_| Error::InvalidSignal {
                body: body.to_string(),
            })
    }

    /// `true` while the session should stay online; `false` forces a disconnect.
    #[must_use]
    pub fn keep_connected(self) -> bool {
        self.keep_connected
    }
}

/// Category of a notification in the server's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Raised by a private message.
    PrivateMessage,
    /// Raised by a radio message mentioning the callsign.
    RadioMessage,
    /// Raised by a SELCAL.
    SelcalAlert,
    /// Raised by the server's crash detection.
    CrashDetect,
    /// A kind this build does not know about.
    #[serde(other)]
    Other,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateMessage => write!(f, "private message"),
            Self::RadioMessage => write!(f, "radio message"),
            Self::SelcalAlert => write!(f, "selcal"),
            Self::CrashDetect => write!(f, "crash detect"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Timestamp format used by the server's notification history.
const HISTORY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One entry of the server's notification history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotificationRecord {
    /// Human-readable description.
    pub message: String,
    /// Server-local time the notification was sent.
    #[serde(deserialize_with = "history_timestamp")]
    pub timestamp: NaiveDateTime,
    /// What raised it.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
}

fn history_timestamp<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, HISTORY_TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
}
