//! Persistent device state.
//!
//! The device keeps its server address, push token and selected alarm sound
//! in a small `SQLite` key-value store. Every execution context opens the
//! store itself and reads it fresh; nothing is cached in memory. Writes
//! replace whole values, so concurrent writers resolve as last-writer-wins.

pub mod migrations;
pub mod schema;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// How long a writer waits on a lock held by another context.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// The values the device persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Base address of the alert server.
    ServerAddress,
    /// Token the push channel uses to reach this device.
    PushToken,
    /// Sound played when the alarm fires.
    SelectedSound,
}

impl SettingKey {
    /// Row key in the settings table.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerAddress => "server_address",
            Self::PushToken => "push_token",
            Self::SelectedSound => "selected_sound",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the persisted registration values.
///
/// Any of them may be absent; absence is a soft miss, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceRegistration {
    /// Base address of the alert server.
    pub server_address: Option<String>,
    /// Push token last obtained for this device.
    pub push_token: Option<String>,
    /// Sound to loop when the alarm fires.
    pub selected_sound: Option<String>,
}

/// `SQLite`-backed store for device settings.
#[derive(Debug)]
pub struct DeviceStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl DeviceStore {
    /// Open or create the store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening device store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // The UI and a background dispatch may hold the file at the same time
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        debug!("Device store ready at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a single value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, key: SettingKey) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a single value, replacing whatever was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set(&self, key: SettingKey, value: &str) -> Result<()> {
        self.conn.execute(
            r"
            INSERT OR REPLACE INTO settings (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ",
            (key.as_str(), value),
        )?;
        debug!(%key, "Setting stored");
        Ok(())
    }

    /// Remove a value. Returns `true` if something was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove(&self, key: SettingKey) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", [key.as_str()])?;
        Ok(affected > 0)
    }

    /// Read all registration values at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn registration(&self) -> Result<DeviceRegistration> {
        Ok(DeviceRegistration {
            server_address: self.get(SettingKey::ServerAddress)?,
            push_token: self.get(SettingKey::PushToken)?,
            selected_sound: self.get(SettingKey::SelectedSound)?,
        })
    }

    /// Persist the server base address.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_server_address(&self, address: &str) -> Result<()> {
        self.set(SettingKey::ServerAddress, address.trim())?;
        info!(server = address.trim(), "Server address saved");
        Ok(())
    }

    /// Persist the push token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_push_token(&self, token: &str) -> Result<()> {
        self.set(SettingKey::PushToken, token)
    }

    /// Persist the selected alarm sound.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_selected_sound(&self, uri: &str) -> Result<()> {
        self.set(SettingKey::SelectedSound, uri)?;
        info!(sound = uri, "Alarm sound selected");
        Ok(())
    }

    /// Forget the selected alarm sound.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_selected_sound(&self) -> Result<()> {
        self.remove(SettingKey::SelectedSound)?;
        Ok(())
    }
}
