//! Error types for the client.

use crate::config::ConfigError;
use campus_core::{FetchError, RemoteError, SyncError, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl ClientError {
    /// Collapse into the port's error taxonomy.
    pub fn into_remote(self) -> RemoteError {
        match self {
            ClientError::Remote(err) => err,
            ClientError::Http(err) => match err.status() {
                Some(status) => RemoteError::rejected(status.as_u16(), err.to_string()),
                None if err.is_decode() => RemoteError::decode(err.to_string()),
                None => RemoteError::unreachable(err.to_string()),
            },
            ClientError::Serde(err) => RemoteError::from(err),
            ClientError::Validation(err) => RemoteError::decode(err.to_string()),
            other => RemoteError::unreachable(other.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
