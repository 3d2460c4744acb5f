//! Operation schema versions.

use std::fmt;

/// Schema version of an operation envelope, ordered oldest to newest.
///
/// The ordering and labels are diagnostic only; decoding relies on which
/// version slot of an envelope is populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpVersion {
    #[default]
    Undefined,
    V1_7,
    V1_8,
    V1_9,
    V1_10,
    V1_11,
    V1_12,
}

impl OpVersion {
    /// Version written by this build.
    pub const CURRENT: Self = Self::V1_12;

    /// Wire label of the version slot (e.g. `"1.12"`).
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::V1_7 => "1.7",
            Self::V1_8 => "1.8",
            Self::V1_9 => "1.9",
            Self::V1_10 => "1.10",
            Self::V1_11 => "1.11",
            Self::V1_12 => "1.12",
        }
    }

    /// Parse a wire label. Returns `None` for labels this build has never
    /// heard of.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "1.7" => Some(Self::V1_7),
            "1.8" => Some(Self::V1_8),
            "1.9" => Some(Self::V1_9),
            "1.10" => Some(Self::V1_10),
            "1.11" => Some(Self::V1_11),
            "1.12" => Some(Self::V1_12),
            _ => None,
        }
    }

    /// Whether envelopes of this version can be decoded and applied.
    #[must_use]
    pub fn is_supported(self) -> bool {
        matches!(self, Self::V1_11 | Self::V1_12)
    }
}

impl fmt::Display for OpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_roundtrip() {
        for v in [
            OpVersion::V1_7,
            OpVersion::V1_8,
            OpVersion::V1_9,
            OpVersion::V1_10,
            OpVersion::V1_11,
            OpVersion::V1_12,
        ] {
            assert_eq!(OpVersion::from_label(v.label()), Some(v));
        }
        assert_eq!(OpVersion::from_label("undefined"), None);
        assert_eq!(OpVersion::from_label("2.0"), None);
        assert_eq!(OpVersion::default().to_string(), "undefined");
    }

    #[test]
    fn ordered_oldest_to_newest() {
        assert!(OpVersion::V1_7 < OpVersion::V1_10);
        assert!(OpVersion::V1_10 < OpVersion::V1_12);
        assert_eq!(OpVersion::CURRENT, OpVersion::V1_12);
    }

    #[test]
    fn only_recent_versions_supported() {
        assert!(OpVersion::V1_12.is_supported());
        assert!(OpVersion::V1_11.is_supported());
        assert!(!OpVersion::V1_10.is_supported());
        assert!(!OpVersion::Undefined.is_supported());
    }
}
