//! Speaker output through rodio.
//!
//! The output stream is not `Send`, so it lives on a dedicated thread and
//! [`RodioOutput`] talks to that thread over a channel.

use std::fs::File;
use std::io::BufReader;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread;

use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use tracing::{debug, warn};

use super::AudioOutput;
use crate::error::{Error, Result};

enum Command {
    Open {
        uri: String,
        looped: bool,
        reply: SyncSender<Result<()>>,
    },
    Release,
}

/// Plays through the default output device.
#[derive(Debug)]
pub struct RodioOutput {
    commands: Sender<Command>,
}

impl RodioOutput {
    /// Open the default output device on a new audio thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AudioDevice`] if there is no usable output device.
    pub fn new() -> Result<Self> {
        let (commands, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        thread::Builder::new()
            .name("vpilot-audio".to_string())
            .spawn(move || audio_thread(&rx, &ready_tx))?;

        ready_rx
            .recv()
            .map_err(|_| Error::AudioDevice("audio thread exited during startup".to_string()))??;

        Ok(Self { commands })
    }
}

impl AudioOutput for RodioOutput {
    fn open(&mut self, uri: &str, looped: bool) -> Result<()> {
        let (reply, result) = mpsc::sync_channel(1);
        self.commands
            .send(Command::Open {
                uri: uri.to_string(),
                looped,
                reply,
            })
            .map_err(|_| Error::AudioDevice("audio thread is gone".to_string()))?;

        result
            .recv()
            .map_err(|_| Error::AudioDevice("audio thread is gone".to_string()))?
    }

    fn release(&mut self) {
        if self.commands.send(Command::Release).is_err() {
            warn!("Audio thread is gone, nothing to release");
        }
    }
}

fn audio_thread(commands: &Receiver<Command>, ready: &SyncSender<Result<()>>) {
    let mut stream = match OutputStreamBuilder::open_default_stream() {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(Error::AudioDevice(e.to_string())));
            return;
        }
    };
    stream.log_on_drop(false);
    let _ = ready.send(Ok(()));

    let mut sink: Option<Sink> = None;

    // Ends when the RodioOutput is dropped
    for command in commands {
        match command {
            Command::Open { uri, looped, reply } => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                let result = open_sink(&stream, &uri, looped).map(|new| {
                    sink = Some(new);
                });
                let _ = reply.send(result);
            }
            Command::Release => {
                if let Some(old) = sink.take() {
                    old.stop();
                    debug!("Sink released");
                }
            }
        }
    }
}

fn open_sink(stream: &OutputStream, uri: &str, looped: bool) -> Result<Sink> {
    let file = File::open(uri).map_err(|e| Error::audio_load(uri, e.to_string()))?;
    let source =
        Decoder::new(BufReader::new(file)).map_err(|e| Error::audio_load(uri, e.to_string()))?;

    let sink = Sink::connect_new(stream.mixer());
    if looped {
        sink.append(source.repeat_infinite());
    } else {
        sink.append(source);
    }
    sink.play();
    Ok(sink)
}
