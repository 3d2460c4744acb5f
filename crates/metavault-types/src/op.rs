//! Operation sum types, one enum per schema version.
//!
//! An [`Op`] holds exactly one version, and each version enum holds exactly
//! one operation kind, so the "one populated slot" rule is structural here.
//! [`Envelope`](crate::Envelope) enforces it for bytes coming off the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{
    ActivateAuthRequest, CheckAuthTokenRequest, ModifyClusterRoleBindingRequest,
    RestoreAuthTokenRequest, SetAclRequest, SetConfigurationRequest,
};
use crate::enterprise::ActivateEnterpriseRequest;
use crate::pfs::{
    BuildCommitRequest, CommitProvenance, CreateBranchRequest, CreateObjectRequest,
    CreateRepoRequest, Object, PutBlockRequest, Repo, TagObjectRequest,
};
use crate::pps::{CreateJobRequest, CreatePipelineRequest};
use crate::version::OpVersion;

/// A single versioned operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = "1.11")]
    V1_11(OpV1_11),
    #[serde(rename = "1.12")]
    V1_12(OpV1_12),
}

impl Op {
    #[must_use]
    pub fn version(&self) -> OpVersion {
        match self {
            Self::V1_11(_) => OpVersion::V1_11,
            Self::V1_12(_) => OpVersion::V1_12,
        }
    }

    /// Wire name of the populated kind slot.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::V1_11(op) => op.kind(),
            Self::V1_12(op) => op.kind(),
        }
    }
}

impl From<OpV1_12> for Op {
    fn from(op: OpV1_12) -> Self {
        Self::V1_12(op)
    }
}

impl From<OpV1_11> for Op {
    fn from(op: OpV1_11) -> Self {
        Self::V1_11(op)
    }
}

/// Operation kinds of the current schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpV1_12 {
    CreateBlock(PutBlockRequest),
    CreateObject(CreateObjectRequest),
    TagObject(TagObjectRequest),
    CreateRepo(CreateRepoRequest),
    BuildCommit(BuildCommitRequest),
    CreateBranch(CreateBranchRequest),
    CreatePipeline(CreatePipelineRequest),
    CreateJob(CreateJobRequest),
    ActivateEnterprise(ActivateEnterpriseRequest),
    CheckAuthToken(CheckAuthTokenRequest),
    ActivateAuth(ActivateAuthRequest),
    RestoreAuthToken(RestoreAuthTokenRequest),
    SetClusterRoleBinding(ModifyClusterRoleBindingRequest),
    SetAuthConfig(SetConfigurationRequest),
    SetAcl(SetAclRequest),
}

impl OpV1_12 {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateBlock(_) => "create_block",
            Self::CreateObject(_) => "create_object",
            Self::TagObject(_) => "tag_object",
            Self::CreateRepo(_) => "create_repo",
            Self::BuildCommit(_) => "build_commit",
            Self::CreateBranch(_) => "create_branch",
            Self::CreatePipeline(_) => "create_pipeline",
            Self::CreateJob(_) => "create_job",
            Self::ActivateEnterprise(_) => "activate_enterprise",
            Self::CheckAuthToken(_) => "check_auth_token",
            Self::ActivateAuth(_) => "activate_auth",
            Self::RestoreAuthToken(_) => "restore_auth_token",
            Self::SetClusterRoleBinding(_) => "set_cluster_role_binding",
            Self::SetAuthConfig(_) => "set_auth_config",
            Self::SetAcl(_) => "set_acl",
        }
    }
}

/// Operation kinds of the 1.11 schema.
///
/// 1.11 predates token checks, token restoration and auth-config
/// restoration, and stores a single tree per commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpV1_11 {
    CreateBlock(PutBlockRequest),
    CreateObject(CreateObjectRequest),
    TagObject(TagObjectRequest),
    CreateRepo(CreateRepoRequest),
    BuildCommit(BuildCommitRequestV1_11),
    CreateBranch(CreateBranchRequest),
    CreatePipeline(CreatePipelineRequest),
    CreateJob(CreateJobRequest),
    ActivateEnterprise(ActivateEnterpriseRequest),
    ActivateAuth(ActivateAuthRequest),
    SetClusterRoleBinding(ModifyClusterRoleBindingRequest),
    SetAcl(SetAclRequest),
}

impl OpV1_11 {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateBlock(_) => "create_block",
            Self::CreateObject(_) => "create_object",
            Self::TagObject(_) => "tag_object",
            Self::CreateRepo(_) => "create_repo",
            Self::BuildCommit(_) => "build_commit",
            Self::CreateBranch(_) => "create_branch",
            Self::CreatePipeline(_) => "create_pipeline",
            Self::CreateJob(_) => "create_job",
            Self::ActivateEnterprise(_) => "activate_enterprise",
            Self::ActivateAuth(_) => "activate_auth",
            Self::SetClusterRoleBinding(_) => "set_cluster_role_binding",
            Self::SetAcl(_) => "set_acl",
        }
    }
}

/// 1.11 commit shape: optional parent, single tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommitRequestV1_11 {
    pub repo: Repo,
    pub id: String,
    #[serde(default)]
    pub parent: Option<crate::pfs::Commit>,
    #[serde(default)]
    pub tree: Option<Object>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub provenance: Vec<CommitProvenance>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
}
