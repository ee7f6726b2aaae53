use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid host '{0}', expected <ip>:<port>")]
    InvalidHost(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session to {0} is closed")]
    SessionClosed(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
