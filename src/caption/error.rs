use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptionError>;

#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("No image selected")]
    NoImageSelected,

    #[error("A caption request is already in flight")]
    Busy,

    #[error("API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Could not connect to {0}. Is Ollama running?")]
    ConnectionRefused(String),

    #[error("Provider error {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Response is missing field '{0}'")]
    MissingField(&'static str),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid image: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptionError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CaptionError::Provider { status, .. } => Some(*status),
            CaptionError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Failures caused by the endpoint or the wire, as opposed to local input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CaptionError::Transport(_)
                | CaptionError::ConnectionRefused(_)
                | CaptionError::Provider { .. }
                | CaptionError::Timeout(_)
        )
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, CaptionError::Decode(_) | CaptionError::MissingField(_))
    }
}
