use thiserror::Error;

/// Errors surfaced by the synchronizer
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Stream error: {0}")]
    Stream(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No operator bound")]
    Unbound,

    #[error("Store closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Stream(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
