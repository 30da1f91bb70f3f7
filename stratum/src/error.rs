use thiserror::Error;

/// Errors raised by the stratum wire layer and the upstream client.
#[derive(Error, Debug)]
pub enum StratumError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The pool answered the request with an error object.
    #[error("{0}")]
    PoolError(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    Disconnected,

    #[error("request timed out")]
    Timeout,
}

impl StratumError {
    /// Transport-level failures end the current connection; message-level ones only drop the message.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StratumError::Io(_) | StratumError::ConnectionFailed(_) | StratumError::Disconnected)
    }
}

pub type StratumResult<T> = std::result::Result<T, StratumError>;
