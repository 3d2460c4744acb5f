//! Admin call errors and their classification.

use std::fmt;

use metavault_cluster::ClusterError;
use metavault_store::StoreError;
use metavault_types::EnvelopeError;

/// Broad category of an [`AdminError`], for callers that react differently
/// to "not authorized", "bad input" and "downstream failure".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authorization,
    InvalidInput,
    Dependency,
    Transport,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Authorization => "authorization",
            Self::InvalidInput => "invalid_input",
            Self::Dependency => "dependency",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Terminal error of an extract or restore call.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{subject} is not authorized to perform this operation; must be an admin to call {operation}")]
    NotAuthorized { subject: String, operation: String },

    /// A cluster service call failed.
    #[error("{context}: {source}")]
    Cluster {
        context: &'static str,
        #[source]
        source: ClusterError,
    },

    /// The destination or source URL could not be used.
    #[error(transparent)]
    Url(StoreError),

    /// Dump bytes could not be written or read.
    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Pipelines read from each other's outputs in a loop.
    #[error("pipeline provenance contains a cycle: {}", .cycle.join(" -> "))]
    ProvenanceCycle { cycle: Vec<String> },

    /// The restore stream broke protocol.
    #[error("invalid restore request: {0}")]
    InvalidRequest(String),

    /// The RPC transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("call cancelled")]
    Cancelled,
}

impl AdminError {
    pub(crate) fn cluster(context: &'static str, source: ClusterError) -> Self {
        Self::Cluster { context, source }
    }

    pub(crate) fn store(context: &'static str, source: StoreError) -> Self {
        Self::Store { context, source }
    }

    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthorized { .. }
            | Self::Cluster {
                source: ClusterError::NotAuthenticated | ClusterError::ExpiredToken { .. },
                ..
            } => ErrorKind::Authorization,
            Self::Cluster { .. } => ErrorKind::Dependency,
            Self::Url(_)
            | Self::Envelope(_)
            | Self::ProvenanceCycle { .. }
            | Self::InvalidRequest(_)
            | Self::Store {
                source: StoreError::RecordTooLarge { .. } | StoreError::UnknownCodec(_),
                ..
            } => ErrorKind::InvalidInput,
            Self::Store { .. } | Self::Transport(_) => ErrorKind::Transport,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AdminError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_authorized_message() {
        let err = AdminError::NotAuthorized {
            subject: "robot:ci".into(),
            operation: "Extract".into(),
        };
        assert_eq!(
            err.to_string(),
            "robot:ci is not authorized to perform this operation; must be an admin to call Extract"
        );
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn cluster_errors_carry_handler_context() {
        let err = AdminError::cluster("error creating repo", ClusterError::Unavailable("down".into()));
        assert_eq!(err.to_string(), "error creating repo: service unavailable: down");
        assert_eq!(err.kind(), ErrorKind::Dependency);

        let err = AdminError::cluster(
            "failed to get auth token from incoming context",
            ClusterError::NotAuthenticated,
        );
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[test]
    fn url_errors_are_unwrapped() {
        let err = AdminError::Url(StoreError::MalformedUrl {
            url: "nope".into(),
            reason: "missing scheme".into(),
        });
        assert_eq!(err.to_string(), "malformed object URL \"nope\": missing scheme");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn decode_errors_are_bad_input() {
        let err = AdminError::from(EnvelopeError::Malformed("no version slot is populated".into()));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().starts_with("malformed envelope"));
    }

    #[test]
    fn cycle_lists_its_members() {
        let err = AdminError::ProvenanceCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "pipeline provenance contains a cycle: a -> b -> a");
    }

    #[test]
    fn io_failures_are_transport() {
        let err = AdminError::store(
            "error writing record",
            StoreError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe")),
        );
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(AdminError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
