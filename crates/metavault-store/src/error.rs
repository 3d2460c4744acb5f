//! Store error types.

/// Errors produced while addressing, framing or moving dump bytes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("malformed object URL {url:?}: {reason}")]
    MalformedUrl { url: String, reason: String },

    /// No [`ObjectClient`](crate::ObjectClient) is registered for the scheme.
    #[error("no object store registered for scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("object {0} not found")]
    NotFound(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lz4 frame error: {0}")]
    Lz4(#[from] lz4_flex::frame::Error),

    /// The stream does not start with a known compression frame.
    #[error("unrecognized compression header {0:02x?}")]
    UnknownCodec([u8; 4]),

    #[error("record of {len} bytes exceeds the {max} byte limit")]
    RecordTooLarge { len: u64, max: u64 },

    /// The stream ended inside a record.
    #[error("truncated record: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("object store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub(crate) fn malformed_url(url: &str, reason: impl Into<String>) -> Self {
        Self::MalformedUrl {
            url: url.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;
