//! One request/response exchange with the server.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::protocol::{ClientMessage, ServerMessage};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server answered {status} ({error_type})")]
    Status { status: u16, error_type: String },

    #[error("undecodable response: {0}")]
    Decode(String),
}

impl TransportError {
    /// 409 (`desync`) and 410 (`session_expired`) mean the server holds no
    /// session matching the shadow tree; retrying cannot help.
    pub fn requires_resync(&self) -> bool {
        matches!(self, TransportError::Status { status: 409 | 410, .. })
    }
}

/// How an exchange ended.
#[derive(Debug)]
pub enum TransportOutcome {
    Success(ServerMessage),
    Timeout(Duration),
    /// The cancellation token fired first; nothing is applied afterwards.
    Canceled,
    Error(TransportError),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` and wait for the server's reply, or for `cancel`.
    async fn exchange(&self, message: ClientMessage, cancel: CancellationToken) -> TransportOutcome;
}

/// Transport over HTTP POST, carrying the session token as a cookie.
pub struct HttpTransport {
    client: Client,
    url: String,
    request_timeout: Duration,
    cookie: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            request_timeout,
            cookie: Mutex::new(None),
        })
    }

    /// The `name=value` cookie pair last set by the server.
    pub fn session_cookie(&self) -> Option<String> {
        self.cookie.lock().clone()
    }

    async fn send(&self, message: &ClientMessage) -> Result<ServerMessage, TransportError> {
        let cookie = self.cookie.lock().clone();
        let mut builder = self.client.post(&self.url).json(message);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if let Some(pair) = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
        {
            *self.cookie.lock() = Some(pair.trim().to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body: Option<serde_json::Value> = response.json().await.ok();
            let error_type = body
                .as_ref()
                .and_then(|body| body["error"]["type"].as_str())
                .unwrap_or("unknown")
                .to_string();
            return Err(TransportError::Status {
                status: status.as_u16(),
                error_type,
            });
        }

        response
            .json::<ServerMessage>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, message: ClientMessage, cancel: CancellationToken) -> TransportOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => TransportOutcome::Canceled,
            result = tokio::time::timeout(self.request_timeout, self.send(&message)) => match result {
                Err(_) => TransportOutcome::Timeout(self.request_timeout),
                Ok(Ok(reply)) => TransportOutcome::Success(reply),
                Ok(Err(e)) => TransportOutcome::Error(e),
            },
        }
    }
}
