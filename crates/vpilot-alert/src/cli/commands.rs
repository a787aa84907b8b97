//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Simulator plugin arguments.
#[derive(Debug, Args)]
pub struct PluginCommand {
    /// Server base address, ignoring the config and the override file
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,
}

/// Handheld device commands.
#[derive(Debug, Subcommand)]
pub enum DeviceCommand {
    /// Read push payloads from stdin and sound the alarm
    Listen {
        /// Push token to register on start
        #[arg(long)]
        token: Option<String>,
    },

    /// Change the server address and register with it
    SetServer {
        /// Server base address, e.g. http://192.168.1.20:8080/vpilot-alert/api
        url: String,

        /// Push token to register
        #[arg(long)]
        token: Option<String>,
    },

    /// Register the push token with the stored server
    Register {
        /// Push token to register
        #[arg(long)]
        token: Option<String>,
    },

    /// Choose the alarm sound
    SelectSound {
        /// Path to the sound file
        path: PathBuf,

        /// Don't play a preview
        #[arg(long)]
        no_preview: bool,
    },

    /// Forget the selected alarm sound
    ClearSound,

    /// Show stored device settings
    Status {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the server's notification history
    History {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// Only show the newest N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Stop the alarm and tell the server
    StopAlarm,

    /// Ask the server to disconnect the simulator now
    Disconnect,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
