use thiserror::Error;

#[derive(Error, Debug)]
pub enum TributaryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Could not parse timestamp: {0}")]
    TimeParse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Other(String),
}

impl<T> From<std::sync::PoisonError<T>> for TributaryError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        TributaryError::Storage(format!("lock poisoned: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, TributaryError>;
