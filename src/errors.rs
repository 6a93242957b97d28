use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("NETWORK: {0}")]
    Network(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("CONFLICT: destination already exists: {destination}")]
    Conflict { destination: String },
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient failures are retried and eventually absorbed by the cache
    /// fallback; everything else propagates to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        // Status-code mapping happens at the call site; anything that
        // reaches this From is a transport failure (refused, reset, timeout).
        Self::Network(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
