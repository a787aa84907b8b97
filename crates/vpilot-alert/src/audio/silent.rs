//! Output for machines without a sound device.

use std::fs::File;

use tracing::{debug, info};

use super::AudioOutput;
use crate::error::{Error, Result};

/// Checks that the sound file can be opened and logs instead of playing.
///
/// Used by headless builds and anywhere the `rodio` feature is off. Load
/// failures still surface exactly as they would with a real device.
#[derive(Debug, Default)]
pub struct SilentOutput {
    current: Option<String>,
}

impl SilentOutput {
    /// Create a silent output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for SilentOutput {
    fn open(&mut self, uri: &str, looped: bool) -> Result<()> {
        let file = File::open(uri).map_err(|e| Error::audio_load(uri, e.to_string()))?;
        let metadata = file
            .metadata()
            .map_err(|e| Error::audio_load(uri, e.to_string()))?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(Error::audio_load(uri, "not a playable file"));
        }

        info!(uri, looped, "Sound would play now (no audio device)");
        self.current = Some(uri.to_string());
        Ok(())
    }

    fn release(&mut self) {
        if let Some(uri) = self.current.take() {
            debug!(uri, "Silent playback released");
        }
    }
}
