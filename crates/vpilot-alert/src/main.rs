//! `vpalert` - CLI for vpilot-alert
//!
//! Runs the simulator-side relay and safety poll, and the handheld device's
//! alarm listener and settings commands.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::runtime::Handle;

use vpilot_alert::audio::{default_output, AlarmAudioEngine};
use vpilot_alert::bridge::{self, LineSession};
use vpilot_alert::cli::{Cli, Command, ConfigCommand, DeviceCommand, PluginCommand};
use vpilot_alert::registration::{
    PushTokenProvider, RegistrationReport, Registrar, StaticTokenProvider, StoredTokenProvider,
};
use vpilot_alert::server::{AlertServer, HttpConnector, HttpServer, ServerConnector};
use vpilot_alert::storage::DeviceStore;
use vpilot_alert::{init_logging, Config, EventRelay, NotificationDispatch, SafetyPoll};

const NO_SERVER: &str = "no server address set; run `vpalert device set-server <URL>` first";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Plugin(plugin_cmd) => run_plugin(&config, plugin_cmd).await,
        Command::Device(device_cmd) => handle_device(&config, device_cmd).await,
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

async fn run_plugin(config: &Config, cmd: PluginCommand) -> Result<()> {
    // The override file is read once, here
    let url = cmd.server.unwrap_or_else(|| config.plugin_server_url());
    let server: Arc<dyn AlertServer> = Arc::new(HttpServer::new(&url, config.request_timeout())?);
    tracing::info!(server = %url, "Plugin starting");

    let relay = EventRelay::new(server.clone(), Handle::current());
    let poll = SafetyPoll::new(
        server,
        Arc::new(LineSession::stdout()),
        config.poll_interval(),
    );
    let poll_handle = poll.spawn(&Handle::current());

    let stats = bridge::run_plugin(BufReader::new(tokio::io::stdin()), &relay).await?;
    poll_handle.stop();

    tracing::info!(
        events = stats.accepted,
        skipped = stats.skipped,
        relayed = relay.stats().relayed,
        failed = relay.stats().failed,
        disconnects = poll.disconnect_requests(),
        "Plugin stopped"
    );
    Ok(())
}

async fn handle_device(config: &Config, cmd: DeviceCommand) -> Result<()> {
    let store_path = config.database_path();
    let connector: Arc<dyn ServerConnector> =
        Arc::new(HttpConnector::new(config.request_timeout()));

    match cmd {
        DeviceCommand::Listen { token } => {
            let registrar =
                Registrar::new(&store_path, connector.clone(), token_provider(config, token));
            // Registration must not hold up the alarm
            tokio::spawn(async move {
                if let Err(e) = registrar.cold_start().await {
                    tracing::warn!(error = %e, "Cold-start registration failed");
                }
            });

            let engine = AlarmAudioEngine::new(default_output()?, Handle::current());
            let dispatch =
                NotificationDispatch::new(engine, &store_path, connector, Handle::current());
            let stats = bridge::run_device(BufReader::new(tokio::io::stdin()), &dispatch).await?;
            dispatch.engine().stop();
            tracing::info!(pushes = stats.accepted, "Listener stopped");
        }
        DeviceCommand::SetServer { url, token } => {
            let registrar = Registrar::new(&store_path, connector, token_provider(config, token));
            let report = registrar.change_server_address(&url).await?;
            println!("Server address saved: {}", url.trim());
            print_report(report);
        }
        DeviceCommand::Register { token } => {
            let registrar = Registrar::new(&store_path, connector, token_provider(config, token));
            match registrar.cold_start().await? {
                Some(report) => print_report(report),
                None => bail!(NO_SERVER),
            }
        }
        DeviceCommand::SelectSound { path, no_preview } => {
            let uri = path.to_string_lossy().to_string();
            if !no_preview {
                let engine = AlarmAudioEngine::new(default_output()?, Handle::current());
                engine
                    .preview(&uri, config.preview_bound())
                    .with_context(|| format!("cannot play {uri}"))?;
                println!("Previewing {uri}...");
                tokio::time::sleep(config.preview_bound()).await;
                engine.stop();
            }
            DeviceStore::open(&store_path)?.set_selected_sound(&uri)?;
            println!("Alarm sound set to {uri}");
        }
        DeviceCommand::ClearSound => {
            DeviceStore::open(&store_path)?.clear_selected_sound()?;
            println!("Alarm sound cleared; alarms will be silent.");
        }
        DeviceCommand::Status { json } => {
            let registration = DeviceStore::open(&store_path)?.registration()?;
            if json {
                let status = serde_json::json!({
                    "database_path": store_path,
                    "registration": registration,
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("vpalert device status");
                println!("---------------------");
                println!("Database:      {}", store_path.display());
                println!(
                    "Server:        {}",
                    registration.server_address.as_deref().unwrap_or("(not set)")
                );
                println!(
                    "Push token:    {}",
                    if registration.push_token.is_some() {
                        "stored"
                    } else {
                        "(none)"
                    }
                );
                println!(
                    "Alarm sound:   {}",
                    registration
                        .selected_sound
                        .as_deref()
                        .unwrap_or("(none, alarms are silent)")
                );
            }
        }
        DeviceCommand::History { json, limit } => {
            let server = stored_server(&store_path, connector.as_ref())?;
            let mut history = server.notifications().await?;
            history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            if let Some(limit) = limit {
                history.truncate(limit);
            }

            if json {
                let entries: Vec<_> = history
                    .iter()
                    .map(|n| {
                        serde_json::json!({
                            "timestamp": n.timestamp.to_string(),
                            "type": n.kind,
                            "message": n.message,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if history.is_empty() {
                println!("No notifications.");
            } else {
                for n in &history {
                    println!("{}  {:<15}  {}", n.timestamp, n.kind.to_string(), n.message);
                }
            }
        }
        DeviceCommand::StopAlarm => {
            // This process never played anything, so this only tells the server
            let dispatch =
                NotificationDispatch::without_audio(&store_path, connector, Handle::current());
            if dispatch.acknowledge().await {
                println!("Alarm stopped.");
            } else {
                bail!("the server was not told the alarm stopped (see log)");
            }
        }
        DeviceCommand::Disconnect => {
            let server = stored_server(&store_path, connector.as_ref())?;
            server.force_disconnect().await?;
            println!("Disconnect requested; the simulator drops at its next poll.");
        }
    }
    Ok(())
}

fn token_provider(config: &Config, token: Option<String>) -> Arc<dyn PushTokenProvider> {
    match token {
        Some(token) => Arc::new(StaticTokenProvider::new(token)),
        None => Arc::new(StoredTokenProvider::new(config.database_path())),
    }
}

fn stored_server(
    store_path: &std::path::Path,
    connector: &dyn ServerConnector,
) -> Result<Arc<dyn AlertServer>> {
    let Some(address) = DeviceStore::open(store_path)?.registration()?.server_address else {
        bail!(NO_SERVER);
    };
    Ok(connector.connect(&address)?)
}

fn print_report(report: RegistrationReport) {
    println!(
        "Server reachable: {}",
        if report.reachable { "yes" } else { "no" }
    );
    println!(
        "Push token registered: {}",
        if report.token_registered { "yes" } else { "no" }
    );
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  URL:                {}", config.server.url);
                println!("  Override file:      {}", config.override_file_path().display());
                println!("  Plugin uses:        {}", config.plugin_server_url());
                println!("  Request timeout:    {} ms", config.server.request_timeout_ms);
                println!();
                println!("[Plugin]");
                println!("  Poll interval:      {} s", config.plugin.poll_interval_secs);
                println!();
                println!("[Device]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Preview length:     {} s", config.device.preview_secs);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
