//! Keeping the server able to reach this device.
//!
//! Whenever the server address changes, and on every cold start, the device
//! probes the server and re-registers its push token. Both steps are best
//! effort: their outcome is reported, never raised, and the alarm path does
//! not wait on them. A failed registration is retried only by the next start.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::validate_server_url;
use crate::error::Result;
use crate::server::{AlertServer, ServerConnector};
use crate::storage::DeviceStore;

/// Source of the token the push channel uses to address this device.
#[async_trait]
pub trait PushTokenProvider: Send + Sync {
    /// Fetch the current token, refreshing it if the channel requires.
    ///
    /// # Errors
    ///
    /// Returns an error if no token can be obtained right now.
    async fn token(&self) -> Result<String>;
}

/// A token handed over by whoever set up the push channel.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wrap a known token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl PushTokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Token provider that reuses the token last stored on the device.
#[derive(Debug, Clone)]
pub struct StoredTokenProvider {
    store_path: PathBuf,
}

impl StoredTokenProvider {
    /// Read tokens from the store at `store_path`.
    #[must_use]
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
        }
    }
}

#[async_trait]
impl PushTokenProvider for StoredTokenProvider {
    async fn token(&self) -> Result<String> {
        let token = DeviceStore::open(&self.store_path)?.registration()?.push_token;
        token.ok_or_else(|| crate::Error::internal("no push token has been stored yet"))
    }
}

/// What a registration attempt achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationReport {
    /// The reachability probe succeeded.
    pub reachable: bool,
    /// The server accepted the push token.
    pub token_registered: bool,
}

/// Runs the registration flows against the persisted device state.
pub struct Registrar {
    store_path: PathBuf,
    connector: Arc<dyn ServerConnector>,
    tokens: Arc<dyn PushTokenProvider>,
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("store_path", &self.store_path)
            .finish_non_exhaustive()
    }
}

impl Registrar {
    /// Create a registrar over the store at `store_path`.
    #[must_use]
    pub fn new(
        store_path: impl Into<PathBuf>,
        connector: Arc<dyn ServerConnector>,
        tokens: Arc<dyn PushTokenProvider>,
    ) -> Self {
        Self {
            store_path: store_path.into(),
            connector,
            tokens,
        }
    }

    /// Path of the device store.
    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Persist a new server address, then probe it and register the token.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not an http(s) URL or cannot be
    /// stored. Probe and token failures only show up in the report.
    pub async fn change_server_address(&self, address: &str) -> Result<RegistrationReport> {
        validate_server_url(address)?;
        DeviceStore::open(&self.store_path)?.set_server_address(address)?;
        Ok(self.register(address.trim()).await)
    }

    /// Re-register with the stored server address, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn cold_start(&self) -> Result<Option<RegistrationReport>> {
        let address = DeviceStore::open(&self.store_path)?
            .registration()?
            .server_address;
        let Some(address) = address else {
            info!("No server address configured yet, skipping registration");
            return Ok(None);
        };
        Ok(Some(self.register(&address).await))
    }

    async fn register(&self, address: &str) -> RegistrationReport {
        let server = match self.connector.connect(address) {
            Ok(server) => server,
            Err(e) => {
                warn!(server = address, error = %e, "Cannot reach server");
                return RegistrationReport::default();
            }
        };

        let (reachable, token_registered) =
            tokio::join!(probe(server.as_ref()), self.refresh_token(server.as_ref()));
        RegistrationReport {
            reachable,
            token_registered,
        }
    }

    async fn refresh_token(&self, server: &dyn AlertServer) -> bool {
        let token = match self.tokens.token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "No push token available");
                return false;
            }
        };

        if let Err(e) = DeviceStore::open(&self.store_path).and_then(|s| s.set_push_token(&token))
        {
            warn!(error = %e, "Cannot store push token");
        }

        match server.register_token(&token).await {
            Ok(()) => {
                info!(server = server.base_url(), "Push token registered");
                true
            }
            Err(e) => {
                warn!(server = server.base_url(), error = %e, "Push token not registered");
                false
            }
        }
    }
}

async fn probe(server: &dyn AlertServer) -> bool {
    match server.probe().await {
        Ok(()) => {
            info!(server = server.base_url(), "Server reachable");
            true
        }
        Err(e) => {
            warn!(server = server.base_url(), error = %e, "Server unreachable");
            false
        }
    }
}
