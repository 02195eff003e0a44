use thiserror::Error;

/// Failure talking to a remote service.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server answered HTTP {status}")]
    ServerStatus { status: u16 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request rejected: {message}")]
    Rejected { message: String },

    #[error("daily quota exhausted: {message}")]
    QuotaExhausted { message: String },
}

impl RemoteError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout => true,
            RemoteError::ServerStatus { status } => *status >= 500,
            RemoteError::InvalidResponse(_)
            | RemoteError::Rejected { .. }
            | RemoteError::QuotaExhausted { .. } => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::ServerStatus {
                status: status.as_u16(),
            }
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}
