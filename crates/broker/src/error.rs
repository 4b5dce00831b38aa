use thiserror::Error;

/// Errors raised by broker transports and the connection manager.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached, or the connection is down or being
    /// re-established.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The queue has not been declared on the current connection.
    #[error("Queue not declared: {0}")]
    QueueNotFound(String),

    /// A message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        BrokerError::Unavailable(err.to_string())
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
