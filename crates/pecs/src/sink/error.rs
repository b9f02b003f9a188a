use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode reply from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize boot row: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("{what} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        what: String,
        attempts: u32,
        #[source]
        last: Box<SinkError>,
    },
}

impl SinkError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether another attempt could succeed. Client errors and malformed
    /// replies will not fix themselves.
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Request { .. } | SinkError::Io { .. } => true,
            SinkError::Status { status, .. } => matches!(status, 408 | 429) || *status >= 500,
            SinkError::Decode { .. } | SinkError::Serialize(_) => false,
            SinkError::RetriesExhausted { .. } => false,
        }
    }
}
