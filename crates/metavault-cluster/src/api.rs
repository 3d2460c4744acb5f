//! Cluster service traits.
//!
//! Each trait mirrors one service of a live cluster. Calls that can return
//! unbounded result sets yield a [`Listing`] so callers process one item at
//! a time instead of buffering the whole set.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use metavault_types::auth::{
    AclEntries, AuthConfig, ClusterRoles, HashedAuthToken, ModifyClusterRoleBindingRequest,
    RestoreAuthTokenRequest, SetAclRequest, SetConfigurationRequest, WhoAmI,
};
use metavault_types::enterprise::{ActivateEnterpriseRequest, EnterpriseInfo};
use metavault_types::pfs::{
    Block, Branch, BranchInfo, BuildCommitRequest, Commit, CommitInfo, CreateBranchRequest,
    CreateObjectRequest, CreateRepoRequest, ObjectInfo, PutBlockRequest, Repo, RepoInfo,
    TagInfo, TagObjectRequest,
};
use metavault_types::pps::{
    CreateJobRequest, CreatePipelineRequest, Job, JobInfo, Pipeline, PipelineInfo,
};

use crate::error::Result;

/// A server-streamed result set.
pub type Listing<T> = BoxStream<'static, Result<T>>;

/// Versioned filesystem: repositories, commits and branches.
#[async_trait]
pub trait PfsApi: Send + Sync {
    /// User-visible repositories, newest first. Internal repositories are
    /// not listed.
    async fn list_repos(&self) -> Result<Vec<RepoInfo>>;

    async fn inspect_repo(&self, repo: &Repo) -> Result<RepoInfo>;

    async fn create_repo(&self, request: CreateRepoRequest) -> Result<()>;

    /// Every commit of every repository, each after its parent and
    /// provenance.
    fn list_commits(&self) -> Listing<CommitInfo>;

    async fn inspect_commit(&self, commit: &Commit) -> Result<CommitInfo>;

    /// Create a commit with a fixed identity.
    async fn build_commit(&self, request: BuildCommitRequest) -> Result<()>;

    /// All branches, newest first; oldest first when `reverse` is set.
    async fn list_branches(&self, reverse: bool) -> Result<Vec<BranchInfo>>;

    async fn inspect_branch(&self, branch: &Branch) -> Result<BranchInfo>;

    /// Create a branch, or move an existing one.
    async fn create_branch(&self, request: CreateBranchRequest) -> Result<()>;
}

/// Pipeline service.
#[async_trait]
pub trait PpsApi: Send + Sync {
    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>>;

    async fn inspect_pipeline(&self, pipeline: &Pipeline) -> Result<PipelineInfo>;

    async fn create_pipeline(&self, request: CreatePipelineRequest) -> Result<()>;

    /// Jobs of `pipeline`, oldest first.
    fn list_jobs(&self, pipeline: &Pipeline) -> Listing<JobInfo>;

    async fn create_job(&self, request: CreateJobRequest) -> Result<Job>;
}

/// Content-addressed block and object storage.
#[async_trait]
pub trait ObjectApi: Send + Sync {
    fn list_blocks(&self) -> Listing<Block>;

    async fn get_block(&self, block: &Block) -> Result<Bytes>;

    async fn put_block(&self, request: PutBlockRequest) -> Result<()>;

    fn list_objects(&self) -> Listing<ObjectInfo>;

    async fn create_object(&self, request: CreateObjectRequest) -> Result<()>;

    fn list_tags(&self) -> Listing<TagInfo>;

    async fn tag_object(&self, request: TagObjectRequest) -> Result<()>;
}

/// Enterprise license service.
#[async_trait]
pub trait EnterpriseApi: Send + Sync {
    async fn get_state(&self) -> Result<EnterpriseInfo>;

    async fn activate(&self, request: ActivateEnterpriseRequest) -> Result<()>;
}

/// Authentication and authorization service.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Identify the holder of `token`.
    ///
    /// Returns [`ClusterError::NotActivated`](crate::ClusterError::NotActivated)
    /// when auth is off, which callers treat as "everyone is allowed".
    async fn who_am_i(&self, token: Option<&str>) -> Result<WhoAmI>;

    /// Turn auth on, making `root_token` a super-admin credential.
    async fn activate(&self, root_token: &str) -> Result<()>;

    async fn get_configuration(&self) -> Result<AuthConfig>;

    async fn set_configuration(&self, request: SetConfigurationRequest) -> Result<()>;

    /// Hashed tokens that can be carried to another cluster.
    async fn extract_tokens(&self) -> Result<Vec<HashedAuthToken>>;

    async fn restore_token(&self, request: RestoreAuthTokenRequest) -> Result<()>;

    async fn get_role_bindings(&self) -> Result<BTreeMap<String, ClusterRoles>>;

    async fn modify_role_binding(&self, request: ModifyClusterRoleBindingRequest) -> Result<()>;

    async fn get_acl(&self, repo: &Repo) -> Result<AclEntries>;

    async fn set_acl(&self, request: SetAclRequest) -> Result<()>;
}

/// Handle to every service of one cluster.
///
/// Constructed once by the embedding server and passed into each call; cheap
/// to clone.
#[derive(Clone)]
pub struct ClusterClient {
    pub pfs: Arc<dyn PfsApi>,
    pub pps: Arc<dyn PpsApi>,
    pub objects: Arc<dyn ObjectApi>,
    pub enterprise: Arc<dyn EnterpriseApi>,
    pub auth: Arc<dyn AuthApi>,
}

impl ClusterClient {
    /// Use one value for every service.
    pub fn from_shared<C>(cluster: Arc<C>) -> Self
    where
        C: PfsApi + PpsApi + ObjectApi + EnterpriseApi + AuthApi + 'static,
    {
        Self {
            pfs: cluster.clone(),
            pps: cluster.clone(),
            objects: cluster.clone(),
            enterprise: cluster.clone(),
            auth: cluster,
        }
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient").finish_non_exhaustive()
    }
}
