use thiserror::Error;
use vmsh_core::CoreError;

/// HTTP status the service uses when a task's status can never be updated again.
pub const STATUS_FROZEN: u16 = 500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Pool '{0}' not found")]
    NotFound(String),

    #[error("Service refused the request: {0}")]
    Refused(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether a poller must stop for good after seeing this error.
    #[must_use]
    pub fn is_fatal_for_polling(&self) -> bool {
        matches!(self, RemoteError::Rejected { status, .. } if *status == STATUS_FROZEN)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("No pool selected: create or select a pool first")]
    NoPoolSelected,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
