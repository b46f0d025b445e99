//! Error types for adsync core

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    // Playback errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // Advertising errors
    #[error("Ad request failed: {0}")]
    AdRequest(String),

    // Lifecycle errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Player {0} is closed")]
    PlayerClosed(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an ad request error
    pub fn ad_request(msg: impl Into<String>) -> Self {
        Error::AdRequest(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns true if playback can continue after this error.
    ///
    /// A failed ad request falls back to content-only playback, so it never
    /// ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::AdRequest(_))
    }

    /// Returns the error code reported alongside events
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Pipeline(_) => "PIPELINE",
            Error::AdRequest(_) => "AD_REQUEST",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::PlayerClosed(_) => "PLAYER_CLOSED",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}
