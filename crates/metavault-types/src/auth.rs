//! Access-control facts and requests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject that owns the root token after auth activation.
pub const ROOT_SUBJECT: &str = "robot:root";

/// Identity of the caller as seen by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoAmI {
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterRole {
    SuperAdmin,
    FsAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterRoles {
    #[serde(default)]
    pub roles: Vec<ClusterRole>,
}

impl ClusterRoles {
    #[must_use]
    pub fn super_admin() -> Self {
        Self {
            roles: vec![ClusterRole::SuperAdmin],
        }
    }

    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        self.roles.contains(&ClusterRole::SuperAdmin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdProvider {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Cluster auth configuration.
///
/// `live_config_version` is an optimistic-concurrency counter; writing a
/// configuration with version `0` always succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub live_config_version: u64,
    #[serde(default)]
    pub id_providers: Vec<IdProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    #[default]
    Authenticate,
    GetToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub subject: String,
    #[serde(default)]
    pub source: TokenSource,
}

/// A credential as stored by the auth service: the token's hash, never the
/// token itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedAuthToken {
    pub hashed_token: String,
    pub token_info: TokenInfo,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

impl HashedAuthToken {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| exp <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    None,
    Reader,
    Writer,
    Owner,
}

/// Per-repository access control list: principal → scope.
pub type AclEntries = BTreeMap<String, Scope>;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Turn auth on. Extracted dumps carry an empty `root_token`; the restoring
/// caller supplies the real one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivateAuthRequest {
    #[serde(default)]
    pub root_token: String,
}

/// Marker asking the restorer to confirm it holds a usable token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckAuthTokenRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreAuthTokenRequest {
    pub token: HashedAuthToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyClusterRoleBindingRequest {
    pub principal: String,
    pub roles: ClusterRoles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetConfigurationRequest {
    pub configuration: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAclRequest {
    pub repo: String,
    #[serde(default)]
    pub entries: AclEntries,
}
