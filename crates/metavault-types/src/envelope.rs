//! The wire and storage unit of an extract stream.
//!
//! An [`Envelope`] is the serialized form of one [`Op`]: a JSON object with
//! exactly one populated version slot (e.g. `"1.12"`), which in turn holds
//! exactly one populated operation-kind slot. Any other shape is rejected
//! with [`EnvelopeError::Malformed`]. Version slots this build does not know
//! are rejected rather than skipped.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::op::Op;
use crate::version::OpVersion;

/// Errors produced while encoding or decoding an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Slot occupancy or payload shape is invalid.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The version slot label is not one this build has ever produced.
    #[error("unrecognized operation version {0:?}")]
    UnknownVersion(String),

    /// The version is known but can no longer be restored.
    #[error("operation version {0} is no longer supported")]
    UnsupportedVersion(OpVersion),

    /// Serialization of an operation failed.
    #[error("failed to encode operation: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One serialized operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope(Bytes);

impl Envelope {
    /// Serialize `op` into its versioned wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn encode(op: &Op) -> Result<Self, EnvelopeError> {
        serde_json::to_vec(op)
            .map(|buf| Self(Bytes::from(buf)))
            .map_err(EnvelopeError::Encode)
    }

    /// Wrap bytes received from a transport without validating them.
    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Validate slot occupancy and decode the operation.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] unless exactly one version slot
    /// and exactly one kind slot are populated and the payload matches the
    /// schema, [`EnvelopeError::UnknownVersion`] for an unrecognized version
    /// label and [`EnvelopeError::UnsupportedVersion`] for a retired one.
    pub fn decode(&self) -> Result<Op, EnvelopeError> {
        let value: Value = serde_json::from_slice(&self.0)
            .map_err(|e| EnvelopeError::Malformed(format!("not a valid document: {e}")))?;

        let (label, body) = single_slot(value, "version")?;
        let version =
            OpVersion::from_label(&label).ok_or_else(|| EnvelopeError::UnknownVersion(label.clone()))?;
        if !version.is_supported() {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }
        let (kind, payload) = single_slot(body, "operation kind")?;

        let mut kinds = Map::new();
        kinds.insert(kind, payload);
        let mut slots = Map::new();
        slots.insert(label, Value::Object(kinds));
        serde_json::from_value(Value::Object(slots))
            .map_err(|e| EnvelopeError::Malformed(format!("invalid {version} operation: {e}")))
    }
}

/// Return the only non-null member of a slot object.
fn single_slot(value: Value, what: &str) -> Result<(String, Value), EnvelopeError> {
    let Value::Object(map) = value else {
        return Err(EnvelopeError::Malformed(format!(
            "expected an object of {what} slots"
        )));
    };
    let mut populated = map.into_iter().filter(|(_, v)| !v.is_null());
    let first = populated
        .next()
        .ok_or_else(|| EnvelopeError::Malformed(format!("no {what} slot is populated")))?;
    if let Some((second, _)) = populated.next() {
        return Err(EnvelopeError::Malformed(format!(
            "more than one {what} slot is populated ({} and {second})",
            first.0
        )));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CheckAuthTokenRequest;
    use crate::op::{OpV1_11, OpV1_12};
    use crate::pfs::{CreateRepoRequest, Repo};

    fn raw(json: &str) -> Envelope {
        Envelope::from_bytes(Bytes::copy_from_slice(json.as_bytes()))
    }

    fn create_repo(name: &str) -> OpV1_12 {
        OpV1_12::CreateRepo(CreateRepoRequest {
            repo: Repo::new(name),
            description: String::new(),
        })
    }

    #[test]
    fn encode_decode_current_version() {
        let op: Op = create_repo("images").into();
        let env = Envelope::encode(&op).unwrap();
        assert_eq!(env.decode().unwrap(), op);
    }

    #[test]
    fn older_supported_version_still_decodes() {
        let op: Op = OpV1_11::CreateRepo(CreateRepoRequest {
            repo: Repo::new("legacy"),
            description: "from 1.11".into(),
        })
        .into();
        let env = Envelope::encode(&op).unwrap();
        let back = env.decode().unwrap();
        assert_eq!(back.version(), OpVersion::V1_11);
        assert_eq!(back, op);
    }

    #[test]
    fn empty_envelope_is_malformed() {
        let err = raw("{}").decode().unwrap_err();
        assert!(
            matches!(err, EnvelopeError::Malformed(ref m) if m.contains("no version slot")),
            "got {err:?}"
        );
    }

    #[test]
    fn two_version_slots_are_malformed() {
        let err = raw(r#"{"1.11":{"check_auth_token":{}},"1.12":{"check_auth_token":{}}}"#)
            .decode()
            .unwrap_err();
        assert!(
            matches!(err, EnvelopeError::Malformed(ref m) if m.contains("more than one version")),
            "got {err:?}"
        );
    }

    #[test]
    fn null_slots_count_as_unpopulated() {
        let op = raw(r#"{"1.11":null,"1.12":{"check_auth_token":{},"set_acl":null}}"#)
            .decode()
            .unwrap();
        assert_eq!(op, Op::V1_12(OpV1_12::CheckAuthToken(CheckAuthTokenRequest {})));
    }

    #[test]
    fn empty_kind_slot_is_malformed() {
        let err = raw(r#"{"1.12":{}}"#).decode().unwrap_err();
        assert!(
            matches!(err, EnvelopeError::Malformed(ref m) if m.contains("no operation kind")),
            "got {err:?}"
        );
    }

    #[test]
    fn two_kind_slots_are_malformed() {
        let err = raw(r#"{"1.12":{"check_auth_token":{},"activate_auth":{}}}"#)
            .decode()
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let err = raw(r#"{"1.12":{"delete_everything":{}}}"#).decode().unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn kind_absent_from_older_schema_is_malformed() {
        let err = raw(r#"{"1.11":{"check_auth_token":{}}}"#).decode().unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn unknown_version_fails_fast() {
        let err = raw(r#"{"1.13":{"create_repo":{"repo":{"name":"x"}}}}"#)
            .decode()
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownVersion(ref v) if v == "1.13"));
    }

    #[test]
    fn retired_version_is_rejected() {
        let err = raw(r#"{"1.9":{"create_repo":{"repo":{"name":"x"}}}}"#)
            .decode()
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::UnsupportedVersion(OpVersion::V1_9)));
        assert_eq!(err.to_string(), "operation version 1.9 is no longer supported");
    }

    #[test]
    fn garbage_is_malformed() {
        let err = raw("\u{1}\u{2}not json").decode().unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
        let err = raw("[1,2,3]").decode().unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }
}
