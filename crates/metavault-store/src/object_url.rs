//! Object-store URL parsing.

use std::fmt;

use crate::error::{Result, StoreError};

const URL_FORM: &str = "expected <service>://<bucket>/<object>";

/// Location of one object: `<scheme>://<bucket>/<object>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl {
    pub scheme: String,
    pub bucket: String,
    pub object: String,
}

impl ObjectUrl {
    /// Parse `raw` into its scheme, bucket and object path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MalformedUrl`] if any part is missing.
    pub fn parse(raw: &str) -> Result<Self> {
        let parsed = url::Url::parse(raw)
            .map_err(|e| StoreError::malformed_url(raw, format!("{e}; {URL_FORM}")))?;
        let bucket = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StoreError::malformed_url(raw, format!("missing bucket; {URL_FORM}")))?;
        let object = parsed.path().trim_start_matches('/');
        if object.is_empty() {
            return Err(StoreError::malformed_url(
                raw,
                format!("missing object path; {URL_FORM}"),
            ));
        }
        Ok(Self {
            scheme: parsed.scheme().to_owned(),
            bucket: bucket.to_owned(),
            object: object.to_owned(),
        })
    }
}

impl std::str::FromStr for ObjectUrl {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.object)
    }
}
