//! Client side of the alert server's HTTP contract.
//!
//! Everything the plugin and the device say to the server goes through the
//! [`AlertServer`] trait. [`HttpServer`] is the production implementation;
//! tests substitute their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;
use tracing::{debug, trace};

use crate::config::validate_server_url;
use crate::error::{Error, Result};
use crate::event::{AlertEvent, ConnectionSignal, NotificationRecord};

const CONNECTION_STATUS: &str = "connection-status";
const FCM_TOKEN: &str = "fcm-token";
const ALARM: &str = "alarm";
const NOTIFICATIONS: &str = "notifications";

/// Operations the alert server offers.
///
/// Every method maps to one request. No method retries; callers decide
/// whether a failure is worth more than a log line.
#[async_trait]
pub trait AlertServer: Send + Sync {
    /// Base address requests are sent to.
    fn base_url(&self) -> &str;

    /// `POST {base}/<variant endpoint>` with the event body.
    async fn relay_event(&self, event: &AlertEvent) -> Result<()>;

    /// `GET {base}/connection-status`.
    async fn connection_status(&self) -> Result<ConnectionSignal>;

    /// `POST {base}/fcm-token` with `{token}`.
    async fn register_token(&self, token: &str) -> Result<()>;

    /// `POST {base}/alarm`: the alarm started sounding.
    async fn alarm_started(&self) -> Result<()>;

    /// `DELETE {base}/alarm`: the pilot stopped the alarm.
    async fn alarm_stopped(&self) -> Result<()>;

    /// Reachability check against a known read-only endpoint.
    async fn probe(&self) -> Result<()>;

    /// `GET {base}/notifications`.
    async fn notifications(&self) -> Result<Vec<NotificationRecord>>;

    /// `DELETE {base}/connection-status`: ask the server to disconnect the session.
    async fn force_disconnect(&self) -> Result<()>;
}

/// Creates server clients for addresses only known at runtime.
///
/// The device reads its server address from storage on every push, so it
/// cannot hold a single client for its lifetime.
pub trait ServerConnector: Send + Sync {
    /// Build a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is unusable.
    fn connect(&self, base_url: &str) -> Result<Arc<dyn AlertServer>>;
}

/// [`AlertServer`] over HTTP with a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpServer {
    client: Client,
    base: String,
}

impl HttpServer {
    /// Create a client for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidServerAddress`] for a non-http(s) address, or
    /// a transport error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        validate_server_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| Error::Transport {
                endpoint: "client".to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base)
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|source| Error::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let status = response.status();
        trace!(endpoint, status = status.as_u16(), "Server responded");
        if !status.is_success() {
            return Err(Error::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn text(endpoint: &str, response: Response) -> Result<String> {
        response.text().await.map_err(|source| Error::Transport {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[async_trait]
impl AlertServer for HttpServer {
    fn base_url(&self) -> &str {
        &self.base
    }

    async fn relay_event(&self, event: &AlertEvent) -> Result<()> {
        let endpoint = event.endpoint();
        let request = self.client.post(self.url(endpoint)).json(&event.body());
        self.send(endpoint, request).await?;
        debug!(endpoint, from = event.sender(), "Event relayed");
        Ok(())
    }

    async fn connection_status(&self) -> Result<ConnectionSignal> {
        let request = self.client.get(self.url(CONNECTION_STATUS));
        let response = self.send(CONNECTION_STATUS, request).await?;
        let body = Self::text(CONNECTION_STATUS, response).await?;
        ConnectionSignal::parse(&body)
    }

    async fn register_token(&self, token: &str) -> Result<()> {
        let request = self
            .client
            .post(self.url(FCM_TOKEN))
            .json(&json!({ "token": token }));
        self.send(FCM_TOKEN, request).await?;
        Ok(())
    }

    async fn alarm_started(&self) -> Result<()> {
        let request = self.client.post(self.url(ALARM));
        self.send(ALARM, request).await?;
        Ok(())
    }

    async fn alarm_stopped(&self) -> Result<()> {
        let request = self.client.delete(self.url(ALARM));
        self.send(ALARM, request).await?;
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        let request = self.client.get(self.url(CONNECTION_STATUS));
        self.send(CONNECTION_STATUS, request).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<Vec<NotificationRecord>> {
        let request = self.client.get(self.url(NOTIFICATIONS));
        let response = self.send(NOTIFICATIONS, request).await?;
        let body = Self::text(NOTIFICATIONS, response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn force_disconnect(&self) -> Result<()> {
        let request = self.client.delete(self.url(CONNECTION_STATUS));
        self.send(CONNECTION_STATUS, request).await?;
        Ok(())
    }
}

/// [`ServerConnector`] producing [`HttpServer`] clients.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Duration,
}

impl HttpConnector {
    /// Create a connector whose clients use `timeout` per request.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ServerConnector for HttpConnector {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn AlertServer>> {
        let server: Arc<dyn AlertServer> = Arc::new(HttpServer::new(base_url, self.timeout)?);
        Ok(server)
    }
}
