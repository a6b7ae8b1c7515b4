use thiserror::Error;

/// Failure classes of the record service, used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    RateLimited,
    TransientNetwork,
    Validation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No valid session. Never retried; polling stops until login.
    #[error("not authenticated: {0}")]
    Authentication(String),
    #[error("rate limited by record service: {0}")]
    RateLimited(String),
    #[error("record service unreachable: {0}")]
    TransientNetwork(String),
    /// The service refused a mutation; `message` is its explanation.
    #[error("rejected by record service: {message}")]
    Validation { message: String },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    pub fn is_auth(&self) -> bool {
        self.kind() == ErrorKind::Authentication
    }
}
