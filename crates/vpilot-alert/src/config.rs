//! Configuration management for vpilot-alert.
//!
//! Configuration is loaded with figment from defaults, a TOML file and
//! environment variables. The plugin side additionally honours a one-line
//! server override file, read once when the plugin starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "vpilot-alert";

/// Default device database file name.
const DATABASE_FILE_NAME: &str = "device.db";

/// Default server override file name.
const OVERRIDE_FILE_NAME: &str = "server.txt";

/// Compiled-in server base address.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080/vpilot-alert/api";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `VPILOT_ALERT_`, sections split on `__`)
/// 2. TOML config file at `~/.config/vpilot-alert/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Alert server configuration.
    pub server: ServerConfig,
    /// Simulator plugin configuration.
    pub plugin: PluginConfig,
    /// Handheld device configuration.
    pub device: DeviceConfig,
}

/// Alert server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base address of the alert server API.
    pub url: String,
    /// File whose contents replace `url` for the plugin.
    /// Defaults to `~/.config/vpilot-alert/server.txt`
    pub override_file: Option<PathBuf>,
    /// Timeout for a single HTTP request in milliseconds.
    pub request_timeout_ms: u64,
}

/// Simulator plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Seconds between connection-status polls.
    pub poll_interval_secs: u64,
}

/// Handheld device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Path to the device database.
    /// Defaults to `~/.local/share/vpilot-alert/device.db`
    pub database_path: Option<PathBuf>,
    /// How long a sound preview plays before it stops on its own.
    pub preview_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            override_file: None, // Will be resolved to default at runtime
            request_timeout_ms: 4_000,
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            preview_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration, reading `config_path` or the default config file.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("VPILOT_ALERT_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the default configuration directory.
    #[must_use]
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.plugin.poll_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "poll_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.device.preview_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "preview_secs must be greater than 0".to_string(),
            });
        }

        if self.server.request_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "request_timeout_ms must be greater than 0".to_string(),
            });
        }

        // A poll must finish before the next one is due
        if self.request_timeout() >= self.poll_interval() {
            return Err(Error::ConfigValidation {
                message: format!(
                    "request_timeout_ms ({}) must be shorter than the poll interval ({}s)",
                    self.server.request_timeout_ms, self.plugin.poll_interval_secs
                ),
            });
        }

        validate_server_url(&self.server.url)?;
        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.device
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the server override file path, resolving defaults if not set.
    #[must_use]
    pub fn override_file_path(&self) -> PathBuf {
        self.server
            .override_file
            .clone()
            .unwrap_or_else(|| Self::default_config_dir().join(OVERRIDE_FILE_NAME))
    }

    /// Resolve the server base address the plugin should use.
    ///
    /// The override file wins when it exists and holds a usable address.
    /// An unreadable or invalid override is logged and ignored.
    #[must_use]
    pub fn plugin_server_url(&self) -> String {
        resolve_server_url(&self.override_file_path(), &self.server.url)
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.plugin.poll_interval_secs)
    }

    /// Get the preview bound as a Duration.
    #[must_use]
    pub fn preview_bound(&self) -> Duration {
        Duration::from_secs(self.device.preview_secs)
    }

    /// Get the HTTP request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

/// Check that a server base address is an http(s) URL with a host.
///
/// # Errors
///
/// Returns [`Error::InvalidServerAddress`] when the address does not parse,
/// has another scheme or names no host.
pub fn validate_server_url(url: &str) -> Result<()> {
    let invalid = |message: String| Error::InvalidServerAddress {
        address: url.to_string(),
        message,
    };

    let parsed = Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!(
            "expected an http:// or https:// address, got {}://",
            parsed.scheme()
        )));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid("missing host".to_string())),
    }
}

/// Read the override file, falling back to `default_url`.
fn resolve_server_url(override_file: &Path, default_url: &str) -> String {
    let contents = match std::fs::read_to_string(override_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %override_file.display(), "No server override file");
            return default_url.to_string();
        }
        Err(e) => {
            warn!(path = %override_file.display(), error = %e, "Cannot read server override file");
            return default_url.to_string();
        }
    };

    let candidate = contents.trim();
    if candidate.is_empty() {
        return default_url.to_string();
    }

    match validate_server_url(candidate) {
        Ok(()) => {
            info!(server = candidate, "Using server address from override file");
            candidate.to_string()
        }
        Err(e) => {
            warn!(error = %e, "Ignoring server override file");
            default_url.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.url, DEFAULT_SERVER_URL);
        assert_eq!(config.plugin.poll_interval_secs, 5);
        assert_eq!(config.device.preview_secs, 5);
        assert!(config.device.database_path.is_none());
        assert!(config.server.override_file.is_none());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.plugin.poll_interval_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_interval_secs"));
    }

    #[test]
    fn test_validate_zero_preview() {
        let mut config = Config::default();
        config.device.preview_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("preview_secs"));
    }

    #[test]
    fn test_validate_timeout_longer_than_poll() {
        let mut config = Config::default();
        config.server.request_timeout_ms = 5_000;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("request_timeout_ms"));
    }

    #[test]
    fn test_validate_bad_url() {
        let mut config = Config::default();
        config.server.url = "ftp://example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidServerAddress { .. })
        ));
    }

    #[test]
    fn test_validate_server_url() {
        assert!(validate_server_url("http://10.0.0.2:8080/vpilot-alert/api").is_ok());
        assert!(validate_server_url("https://alerts.example.com").is_ok());
        assert!(validate_server_url("http://").is_err());
        assert!(validate_server_url("10.0.0.2:8080").is_err());
        assert!(validate_server_url("").is_err());
    }

    #[test]
    fn test_validate_server_url_rejects_unparsable_hosts() {
        for bad in [
            "http://bad host/api",
            "http://bad host:99999/api",
            "http://srv:99999/api",
            "mailto:pilot@example.com",
        ] {
            assert!(
                matches!(
                    validate_server_url(bad),
                    Err(Error::InvalidServerAddress { .. })
                ),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn test_database_path_default() {
        let path = Config::default().database_path();
        assert!(path.to_string_lossy().contains("device.db"));
        assert!(path.to_string_lossy().contains("vpilot-alert"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.device.database_path = Some(PathBuf::from("/custom/device.db"));
        assert_eq!(config.database_path(), PathBuf::from("/custom/device.db"));
    }

    #[test]
    fn test_override_file_path_default() {
        let path = Config::default().override_file_path();
        assert!(path.to_string_lossy().contains("server.txt"));
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.preview_bound(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_millis(4_000));
    }

    #[test]
    fn test_plugin_server_url_without_override() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.override_file = Some(dir.path().join("missing.txt"));

        assert_eq!(config.plugin_server_url(), DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_plugin_server_url_from_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.txt");
        std::fs::write(&path, "  http://192.168.1.20:8080/vpilot-alert/api\n").unwrap();

        let mut config = Config::default();
        config.server.override_file = Some(path);

        assert_eq!(
            config.plugin_server_url(),
            "http://192.168.1.20:8080/vpilot-alert/api"
        );
    }

    #[test]
    fn test_plugin_server_url_ignores_blank_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.txt");
        std::fs::write(&path, "\n  \n").unwrap();

        let mut config = Config::default();
        config.server.override_file = Some(path);

        assert_eq!(config.plugin_server_url(), DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_plugin_server_url_ignores_invalid_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.txt");
        std::fs::write(&path, "not a url").unwrap();

        let mut config = Config::default();
        config.server.override_file = Some(path);

        assert_eq!(config.plugin_server_url(), DEFAULT_SERVER_URL);
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nurl = \"http://10.0.0.5:9000/vpilot-alert/api\"\n\n[plugin]\npoll_interval_secs = 10\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.server.url, "http://10.0.0.5:9000/vpilot-alert/api");
        assert_eq!(config.plugin.poll_interval_secs, 10);
        assert_eq!(config.device.preview_secs, 5);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[plugin]\npoll_interval_secs = 0\n").unwrap();

        assert!(matches!(
            Config::load_from(Some(path)),
            Err(Error::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("poll_interval_secs"));
        assert!(json.contains("request_timeout_ms"));
    }

    #[test]
    fn test_config_clone() {
        let config = Config::default();
        assert_eq!(config, config.clone());
    }
}
