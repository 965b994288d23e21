//! Outbound HTTP transport shared by the health monitor, discovery and invoker.
//!
//! [`HttpTransport`] owns a pooled `reqwest::Client` that is created on first use
//! and dropped by [`Transport::close`]. The next request after a close opens a
//! fresh client. A semaphore caps concurrent in-flight requests.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{core::config::TransportConfig, error::TransportError};

/// A completed HTTP exchange. Any status code counts as completed.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Convenience constructor for a JSON body.
    pub fn json_body(status: StatusCode, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn json(&self) -> Result<Value, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// Body as lossy UTF-8, truncated for log and error messages.
    pub fn body_snippet(&self) -> String {
        const MAX: usize = 256;
        let text = String::from_utf8_lossy(&self.body);
        match text.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.into_owned(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration)
        -> Result<TransportResponse, TransportError>;

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    /// Release pooled connections. Later requests reopen the transport.
    async fn close(&self);

    fn is_open(&self) -> bool;
}

/// `reqwest`-backed [`Transport`].
pub struct HttpTransport {
    config: TransportConfig,
    client: Mutex<Option<reqwest::Client>>,
    limiter: Arc<Semaphore>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        let permits = config.max_connections.max(1);
        Self {
            config,
            client: Mutex::new(None),
            limiter: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Requests currently allowed to start without waiting.
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Return a handle to the pooled client, building it if needed.
    pub fn ensure_open(&self) -> Result<reqwest::Client, TransportError> {
        let mut guard = self.client.lock();
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(self.config.timeout())
            .pool_idle_timeout(self.config.pool_idle_timeout())
            .pool_max_idle_per_host(self.config.max_connections)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {}", e)))?;

        debug!(
            "Opened HTTP transport (max_connections={})",
            self.config.max_connections
        );
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Run one exchange. `timeout` covers the wait for a connection slot as
    /// well as the request itself.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let exchange = async {
            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| TransportError::Closed)?;

            let response = request
                .send()
                .await
                .map_err(|e| classify_error(e, timeout))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| classify_error(e, timeout))?;

            Ok::<_, TransportError>(TransportResponse { status, body })
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

fn classify_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_decode() || err.is_body() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.ensure_open()?;
        self.send(client.get(url), timeout).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let client = self.ensure_open()?;
        self.send(client.post(url).json(body), timeout).await
    }

    async fn close(&self) {
        if self.client.lock().take().is_some() {
            debug!("Closed HTTP transport");
        }
    }

    fn is_open(&self) -> bool {
        self.client.lock().is_some()
    }
}
