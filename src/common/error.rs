use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error: {message}")]
    Api { message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure talking to the text-generation endpoint.
///
/// Only `RateLimited` is retried; everything else degrades straight to the
/// pattern result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("rate limited by inference provider")]
    RateLimited { retry_after: Option<std::time::Duration> },

    #[error("inference transport error: {0}")]
    Transport(String),

    #[error("inference provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("inference provider returned no content")]
    EmptyResponse,
}

impl InferenceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, InferenceError::RateLimited { .. })
    }
}

/// A problem found while validating the festival registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FestivalConfigError {
    #[error("{slug}: unknown venue '{venue}'")]
    UnknownVenue { slug: String, venue: String },

    #[error("{slug}: end date {end} is before start date {start}")]
    InvertedRange { slug: String, start: String, end: String },

    #[error("{first} and {second} overlap at venue '{venue}'")]
    Overlap { first: String, second: String, venue: String },

    #[error("{slug}: starts in month {month}, expected one of {expected:?}")]
    UnexpectedMonth { slug: String, month: u32, expected: Vec<u32> },
}
