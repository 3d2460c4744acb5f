//! Extract and restore call messages.

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// Selects what an extract call includes. Every flag is an exclusion
/// switch: the default request extracts everything to the call's stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRequest {
    #[serde(default)]
    pub no_objects: bool,
    #[serde(default)]
    pub no_repos: bool,
    #[serde(default)]
    pub no_pipelines: bool,
    #[serde(default)]
    pub no_enterprise: bool,
    #[serde(default)]
    pub no_auth: bool,
    /// Write to this object-store URL instead of streaming back.
    #[serde(default)]
    pub url: Option<String>,
}

impl ExtractRequest {
    /// Extract everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Destination URL, treating an empty string as absent.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.is_empty())
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// One inbound message of a restore call.
///
/// The first message either names a URL to restore from, or is itself the
/// first operation; all later messages are operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreRequest {
    Url(String),
    Op(Envelope),
}
