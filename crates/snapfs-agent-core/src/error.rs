use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport connect, read or write failure. Always recoverable.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// An event missing a required field. Rejected per event, never per chunk.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Apply error: {0}")]
    Apply(String),

    #[error("Failed to send ack for batch {batch}: {reason}")]
    AckSend { batch: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}
