use serde::Serialize;

use crate::stream::StreamState;

/// Failure reported by one of the remote collaborators.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Response has no body")]
    MissingBody,
}

impl BackendError {
    /// True for the "record does not exist (yet)" class of failures.
    pub fn is_not_found(&self) -> bool {
        match self {
            BackendError::NotFound(_) => true,
            BackendError::Api { status: 404, .. } => true,
            BackendError::Http(err) if err.status().map(|s| s.as_u16()) == Some(404) => true,
            other => other.to_string().to_lowercase().contains("not found"),
        }
    }
}

impl Serialize for BackendError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The underlying reader failed mid-stream. `partial` holds everything
    /// decoded before the failing read.
    #[error("Stream read error: {message}")]
    Read { message: String, partial: String },
    #[error("Aggregator is not idle (state: {0:?})")]
    NotIdle(StreamState),
}

impl StreamError {
    pub fn partial(&self) -> &str {
        match self {
            StreamError::Read { partial, .. } => partial,
            StreamError::NotIdle(_) => "",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Transport error: {0}")]
    Transport(#[from] BackendError),
    #[error("Chat request rejected with status {status}")]
    Rejected { status: u16 },
    #[error("Chat response has no body")]
    MissingBody,
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl ChatError {
    /// Errors raised before any byte of the reply was read.
    pub fn is_transport(&self) -> bool {
        !matches!(self, ChatError::Stream(_))
    }
}

impl Serialize for ChatError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
