//! Cluster service error types.

/// Errors returned by cluster service calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// The auth service has not been activated.
    #[error("the auth service is not activated")]
    NotActivated,

    /// Auth is already on.
    #[error("the auth service is already activated")]
    AlreadyActivated,

    /// The caller presented no token, or one the cluster does not know.
    #[error("no authentication token")]
    NotAuthenticated,

    /// The token has passed its expiration.
    #[error("token for {subject:?} has already expired")]
    ExpiredToken { subject: String },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The call is valid but the cluster is not in a state to accept it.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Optimistic-concurrency check failed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The service could not be reached or failed internally.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    #[must_use]
    pub fn is_expired_token(&self) -> bool {
        matches!(self, Self::ExpiredToken { .. })
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ClusterError>;
