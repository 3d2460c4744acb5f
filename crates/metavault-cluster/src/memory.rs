//! In-memory implementation of every cluster service.
//!
//! Uses a single `Mutex<State>`. Creation calls check the same preconditions
//! a live cluster does (parents before children, inputs before pipelines,
//! blocks before objects), so an out-of-order replay fails here the way it
//! would against a real deployment.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metavault_types::auth::{
    AclEntries, AuthConfig, ClusterRoles, HashedAuthToken, ModifyClusterRoleBindingRequest,
    RestoreAuthTokenRequest, SetAclRequest, SetConfigurationRequest, TokenInfo, TokenSource,
    WhoAmI, ROOT_SUBJECT,
};
use metavault_types::enterprise::{ActivateEnterpriseRequest, EnterpriseInfo, EnterpriseState};
use metavault_types::pfs::{
    Block, BlockRef, Branch, BranchInfo, BuildCommitRequest, ByteRange, Commit, CommitInfo,
    CreateBranchRequest, CreateObjectRequest, CreateRepoRequest, Object, ObjectInfo, OriginKind,
    PutBlockRequest, Repo, RepoInfo, TagInfo, TagObjectRequest, SPEC_REPO,
};
use metavault_types::pps::{
    CreateJobRequest, CreatePipelineRequest, Input, Job, JobInfo, Pipeline, PipelineInfo,
    PipelineState,
};
use sha2::{Digest, Sha256, Sha512};

use crate::api::{AuthApi, EnterpriseApi, Listing, ObjectApi, PfsApi, PpsApi};
use crate::error::{ClusterError, Result};

/// Content address of a block: lowercase hex SHA-512 of its bytes.
#[must_use]
pub fn hash_block(data: &[u8]) -> String {
    format!("{:x}", Sha512::digest(data))
}

/// Storage key of an auth token: lowercase hex SHA-256 of the token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

const DEFAULT_BRANCH: &str = "master";

#[derive(Default)]
struct AuthState {
    config: AuthConfig,
    tokens: BTreeMap<String, HashedAuthToken>,
    bindings: BTreeMap<String, ClusterRoles>,
    acls: BTreeMap<String, AclEntries>,
}

struct State {
    /// Creation order.
    repos: Vec<RepoInfo>,
    /// Creation order; every commit follows its parent and provenance.
    commits: Vec<CommitInfo>,
    /// Creation order.
    branches: Vec<BranchInfo>,
    pipelines: BTreeMap<String, PipelineInfo>,
    /// Creation order.
    jobs: Vec<JobInfo>,
    blocks: BTreeMap<String, Bytes>,
    objects: BTreeMap<String, ObjectInfo>,
    tags: BTreeMap<String, TagInfo>,
    enterprise: EnterpriseInfo,
    auth: Option<AuthState>,
    salt: i64,
    next_id: u64,
    faults: BTreeSet<String>,
}

impl State {
    fn has_repo(&self, name: &str) -> bool {
        self.repos.iter().any(|r| r.repo.name == name)
    }

    fn has_commit(&self, commit: &Commit) -> bool {
        self.commits.iter().any(|c| &c.commit == commit)
    }

    fn has_branch(&self, branch: &Branch) -> bool {
        self.branches.iter().any(|b| &b.branch == branch)
    }

    /// Globally unique ID for generated commits and jobs.
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        let digest = Sha256::digest(format!("{}:{}", self.salt, self.next_id).as_bytes());
        format!("{digest:x}")[..32].to_owned()
    }

    fn auth(&self) -> Result<&AuthState> {
        self.auth.as_ref().ok_or(ClusterError::NotActivated)
    }

    fn auth_mut(&mut self) -> Result<&mut AuthState> {
        self.auth.as_mut().ok_or(ClusterError::NotActivated)
    }

    fn upsert_branch(&mut self, info: BranchInfo) {
        match self.branches.iter_mut().find(|b| b.branch == info.branch) {
            Some(existing) => *existing = info,
            None => self.branches.push(info),
        }
    }

    /// Record a new spec commit for `pipeline` in `spec_repo` and move the
    /// pipeline's spec branch to it.
    fn freeze_spec(&mut self, spec_repo: &str, pipeline: &str) -> Commit {
        let branch = Branch::new(spec_repo, pipeline);
        let parent_commit = self
            .branches
            .iter()
            .find(|b| b.branch == branch)
            .and_then(|b| b.head.clone());
        let commit = Commit::new(spec_repo, self.next_id());
        let now = Utc::now();
        self.commits.push(CommitInfo {
            commit: commit.clone(),
            origin: OriginKind::User,
            parent_commit,
            provenance: Vec::new(),
            trees: Vec::new(),
            datums: None,
            size_bytes: 0,
            started: Some(now),
            finished: Some(now),
        });
        self.upsert_branch(BranchInfo {
            branch,
            head: Some(commit.clone()),
            direct_provenance: Vec::new(),
        });
        commit
    }
}

/// A complete cluster held in process memory.
pub struct MemoryCluster {
    spec_repo: String,
    state: Mutex<State>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Empty cluster whose internal spec repository is named [`SPEC_REPO`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_spec_repo(SPEC_REPO)
    }

    /// Empty cluster with a custom spec repository name.
    #[must_use]
    pub fn with_spec_repo(spec_repo: impl Into<String>) -> Self {
        let spec_repo = spec_repo.into();
        let now = Utc::now();
        let state = State {
            repos: vec![RepoInfo {
                repo: Repo::new(spec_repo.clone()),
                description: "frozen pipeline specifications".into(),
                created: Some(now),
                size_bytes: 0,
            }],
            commits: Vec::new(),
            branches: Vec::new(),
            pipelines: BTreeMap::new(),
            jobs: Vec::new(),
            blocks: BTreeMap::new(),
            objects: BTreeMap::new(),
            tags: BTreeMap::new(),
            enterprise: EnterpriseInfo::default(),
            auth: None,
            salt: now.timestamp_nanos_opt().unwrap_or_default(),
            next_id: 0,
            faults: BTreeSet::new(),
        };
        Self {
            spec_repo,
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn spec_repo(&self) -> &str {
        &self.spec_repo
    }

    /// Acquire the state lock for `call`, failing if a fault was injected
    /// for it.
    fn state(&self, call: &str) -> Result<MutexGuard<'_, State>> {
        let state = self
            .state
            .lock()
            .map_err(|_| ClusterError::Unavailable("cluster state lock poisoned".into()))?;
        if state.faults.contains(call) {
            return Err(ClusterError::Unavailable(format!("{call} failed")));
        }
        Ok(state)
    }

    /// Make every later invocation of `call` (a trait method name) fail with
    /// [`ClusterError::Unavailable`].
    pub fn inject_fault(&self, call: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.insert(call.to_owned());
        }
    }

    /// Replace the enterprise license state.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Unavailable`] if the state lock is poisoned.
    pub fn set_enterprise(&self, info: EnterpriseInfo) -> Result<()> {
        self.state("set_enterprise")?.enterprise = info;
        Ok(())
    }

    /// Issue a robot token for `subject`, returning the raw token.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::NotActivated`] if auth is off.
    pub fn issue_token(
        &self,
        subject: impl Into<String>,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let mut state = self.state("issue_token")?;
        let token = format!("mvt-{}", state.next_id());
        let subject = subject.into();
        state.auth_mut()?.tokens.insert(
            hash_token(&token),
            HashedAuthToken {
                hashed_token: hash_token(&token),
                token_info: TokenInfo {
                    subject,
                    source: TokenSource::GetToken,
                },
                expiration,
            },
        );
        Ok(token)
    }

    /// Store `data` as a content-addressed block.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Unavailable`] if the state lock is poisoned.
    pub fn store_block(&self, data: impl Into<Bytes>) -> Result<Block> {
        let data = data.into();
        let block = Block::new(hash_block(&data));
        self.state("store_block")?
            .blocks
            .insert(block.hash.clone(), data);
        Ok(block)
    }

    /// Store `data` as an object backed by a block of its own.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Unavailable`] if the state lock is poisoned.
    pub fn store_object(&self, data: impl Into<Bytes>) -> Result<Object> {
        let data = data.into();
        let upper = data.len() as u64;
        let block = self.store_block(data)?;
        let object = Object::new(block.hash.clone());
        self.state("store_object")?.objects.insert(
            object.hash.clone(),
            ObjectInfo {
                object: object.clone(),
                block_ref: BlockRef {
                    block,
                    range: ByteRange { lower: 0, upper },
                },
            },
        );
        Ok(object)
    }

    /// Every pipeline, sorted by name.
    fn pipelines(&self) -> Result<Vec<PipelineInfo>> {
        Ok(self
            .state("list_pipelines")?
            .pipelines
            .values()
            .cloned()
            .collect())
    }
}

fn listing<T: Send + 'static>(items: Result<Vec<T>>) -> Listing<T> {
    match items {
        Ok(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
        Err(err) => stream::iter([Err(err)]).boxed(),
    }
}

// ---------------------------------------------------------------------------
// Versioned filesystem
// ---------------------------------------------------------------------------

#[async_trait]
impl PfsApi for MemoryCluster {
    async fn list_repos(&self) -> Result<Vec<RepoInfo>> {
        let state = self.state("list_repos")?;
        Ok(state
            .repos
            .iter()
            .rev()
            .filter(|r| r.repo.name != self.spec_repo)
            .cloned()
            .collect())
    }

    async fn inspect_repo(&self, repo: &Repo) -> Result<RepoInfo> {
        let state = self.state("inspect_repo")?;
        state
            .repos
            .iter()
            .find(|r| &r.repo == repo)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("repo {repo}")))
    }

    async fn create_repo(&self, request: CreateRepoRequest) -> Result<()> {
        let mut state = self.state("create_repo")?;
        if request.repo.name.is_empty() {
            return Err(ClusterError::InvalidArgument("repo name must be set".into()));
        }
        if state.has_repo(&request.repo.name) {
            return Err(ClusterError::AlreadyExists(format!("repo {}", request.repo)));
        }
        state.repos.push(RepoInfo {
            repo: request.repo,
            description: request.description,
            created: Some(Utc::now()),
            size_bytes: 0,
        });
        Ok(())
    }

    fn list_commits(&self) -> Listing<CommitInfo> {
        listing(self.state("list_commits").map(|s| s.commits.clone()))
    }

    async fn inspect_commit(&self, commit: &Commit) -> Result<CommitInfo> {
        let state = self.state("inspect_commit")?;
        state
            .commits
            .iter()
            .find(|c| &c.commit == commit)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("commit {commit}")))
    }

    async fn build_commit(&self, request: BuildCommitRequest) -> Result<()> {
        let mut state = self.state("build_commit")?;
        let commit = request.commit();
        if request.id.is_empty() {
            return Err(ClusterError::InvalidArgument("commit id must be set".into()));
        }
        if !state.has_repo(&commit.repo.name) {
            return Err(ClusterError::NotFound(format!("repo {}", commit.repo)));
        }
        if !request.parent.is_root_marker() && !state.has_commit(&request.parent) {
            return Err(ClusterError::NotFound(format!(
                "parent commit {}",
                request.parent
            )));
        }
        if let Some(missing) = request
            .provenance
            .iter()
            .find(|p| !state.has_commit(&p.commit))
        {
            return Err(ClusterError::NotFound(format!(
                "provenance commit {}",
                missing.commit
            )));
        }
        if state.has_commit(&commit) {
            return Err(ClusterError::AlreadyExists(format!("commit {commit}")));
        }
        let parent_commit = if request.parent.is_root_marker() {
            None
        } else {
            Some(request.parent)
        };
        state.commits.push(CommitInfo {
            commit,
            origin: request.origin,
            parent_commit,
            provenance: request.provenance,
            trees: request.trees,
            datums: request.datums,
            size_bytes: request.size_bytes,
            started: request.started,
            finished: request.finished,
        });
        Ok(())
    }

    async fn list_branches(&self, reverse: bool) -> Result<Vec<BranchInfo>> {
        let mut branches = self.state("list_branches")?.branches.clone();
        if !reverse {
            branches.reverse();
        }
        Ok(branches)
    }

    async fn inspect_branch(&self, branch: &Branch) -> Result<BranchInfo> {
        let state = self.state("inspect_branch")?;
        state
            .branches
            .iter()
            .find(|b| &b.branch == branch)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("branch {branch}")))
    }

    async fn create_branch(&self, request: CreateBranchRequest) -> Result<()> {
        let mut state = self.state("create_branch")?;
        let branch = request.branch;
        if branch.name.is_empty() {
            return Err(ClusterError::InvalidArgument("branch name must be set".into()));
        }
        if !state.has_repo(&branch.repo.name) {
            return Err(ClusterError::NotFound(format!("repo {}", branch.repo)));
        }
        if let Some(head) = &request.head {
            if head.repo != branch.repo {
                return Err(ClusterError::InvalidArgument(format!(
                    "head {head} is not in repo {}",
                    branch.repo
                )));
            }
            if !state.has_commit(head) {
                return Err(ClusterError::NotFound(format!("commit {head}")));
            }
        }
        if let Some(missing) = request.provenance.iter().find(|p| !state.has_branch(p)) {
            return Err(ClusterError::NotFound(format!("provenance branch {missing}")));
        }
        state.upsert_branch(BranchInfo {
            branch,
            head: request.head,
            direct_provenance: request.provenance,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

#[async_trait]
impl PpsApi for MemoryCluster {
    async fn list_pipelines(&self) -> Result<Vec<PipelineInfo>> {
        self.pipelines()
    }

    async fn inspect_pipeline(&self, pipeline: &Pipeline) -> Result<PipelineInfo> {
        let state = self.state("inspect_pipeline")?;
        state
            .pipelines
            .get(&pipeline.name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("pipeline {pipeline}")))
    }

    async fn create_pipeline(&self, request: CreatePipelineRequest) -> Result<()> {
        let mut state = self.state("create_pipeline")?;
        let name = request.pipeline.name.clone();
        if name.is_empty() {
            return Err(ClusterError::InvalidArgument("pipeline name must be set".into()));
        }
        let previous = state.pipelines.get(&name).map(|p| p.version);
        if previous.is_some() && !request.update {
            return Err(ClusterError::AlreadyExists(format!("pipeline {name}")));
        }
        let inputs = request.input.as_ref().map(Input::repos).unwrap_or_default();
        if let Some(missing) = inputs.iter().find(|repo| !state.has_repo(repo)) {
            return Err(ClusterError::NotFound(format!("input repo {missing}")));
        }
        let spec_commit = match request.spec_commit {
            Some(commit) if !state.has_commit(&commit) => {
                return Err(ClusterError::NotFound(format!("spec commit {commit}")));
            }
            Some(commit) => commit,
            None => state.freeze_spec(&self.spec_repo, &name),
        };
        if !state.has_repo(&name) {
            state.repos.push(RepoInfo {
                repo: Repo::new(name.clone()),
                description: format!("output repo for pipeline {name}"),
                created: Some(Utc::now()),
                size_bytes: 0,
            });
        }
        let output_branch = if request.output_branch.is_empty() {
            DEFAULT_BRANCH.to_owned()
        } else {
            request.output_branch
        };
        state.pipelines.insert(
            name,
            PipelineInfo {
                pipeline: request.pipeline,
                version: previous.map_or(1, |v| v + 1),
                transform: request.transform,
                parallelism_spec: request.parallelism_spec,
                input: request.input,
                output_branch,
                description: request.description,
                enable_stats: request.enable_stats,
                spec_commit: Some(spec_commit),
                state: PipelineState::Running,
                created_at: Some(Utc::now()),
            },
        );
        Ok(())
    }

    fn list_jobs(&self, pipeline: &Pipeline) -> Listing<JobInfo> {
        listing(self.state("list_jobs").map(|s| {
            s.jobs
                .iter()
                .filter(|j| &j.pipeline == pipeline)
                .cloned()
                .collect()
        }))
    }

    async fn create_job(&self, request: CreateJobRequest) -> Result<Job> {
        let mut state = self.state("create_job")?;
        if !state.pipelines.contains_key(&request.pipeline.name) {
            return Err(ClusterError::NotFound(format!("pipeline {}", request.pipeline)));
        }
        for commit in [&request.output_commit, &request.stats_commit]
            .into_iter()
            .flatten()
        {
            if !state.has_commit(commit) {
                return Err(ClusterError::NotFound(format!("commit {commit}")));
            }
        }
        let job = Job::new(state.next_id());
        state.jobs.push(JobInfo {
            job: job.clone(),
            pipeline: request.pipeline,
            output_commit: request.output_commit,
            stats_commit: request.stats_commit,
            restart: request.restart,
            data: request.data,
            stats: request.stats,
            state: request.state,
            reason: request.reason,
            started: request.started,
            finished: request.finished,
        });
        Ok(job)
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

#[async_trait]
impl ObjectApi for MemoryCluster {
    fn list_blocks(&self) -> Listing<Block> {
        listing(
            self.state("list_blocks")
                .map(|s| s.blocks.keys().map(Block::new).collect()),
        )
    }

    async fn get_block(&self, block: &Block) -> Result<Bytes> {
        let state = self.state("get_block")?;
        state
            .blocks
            .get(&block.hash)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("block {}", block.hash)))
    }

    async fn put_block(&self, request: PutBlockRequest) -> Result<()> {
        let mut state = self.state("put_block")?;
        if request.block.hash.is_empty() {
            return Err(ClusterError::InvalidArgument("block hash must be set".into()));
        }
        if hash_block(&request.data) != request.block.hash {
            return Err(ClusterError::InvalidArgument(format!(
                "block {} does not match its content",
                request.block.hash
            )));
        }
        state.blocks.insert(request.block.hash, request.data);
        Ok(())
    }

    fn list_objects(&self) -> Listing<ObjectInfo> {
        listing(
            self.state("list_objects")
                .map(|s| s.objects.values().cloned().collect()),
        )
    }

    async fn create_object(&self, request: CreateObjectRequest) -> Result<()> {
        let mut state = self.state("create_object")?;
        let block_ref = &request.block_ref;
        let len = state
            .blocks
            .get(&block_ref.block.hash)
            .map(|data| data.len() as u64)
            .ok_or_else(|| ClusterError::NotFound(format!("block {}", block_ref.block.hash)))?;
        if block_ref.range.lower > block_ref.range.upper || block_ref.range.upper > len {
            return Err(ClusterError::InvalidArgument(format!(
                "range {}..{} is outside block {} of {len} bytes",
                block_ref.range.lower, block_ref.range.upper, block_ref.block.hash
            )));
        }
        state.objects.insert(
            request.object.hash.clone(),
            ObjectInfo {
                object: request.object,
                block_ref: request.block_ref,
            },
        );
        Ok(())
    }

    fn list_tags(&self) -> Listing<TagInfo> {
        listing(self.state("list_tags").map(|s| s.tags.values().cloned().collect()))
    }

    async fn tag_object(&self, request: TagObjectRequest) -> Result<()> {
        let mut state = self.state("tag_object")?;
        if !state.objects.contains_key(&request.object.hash) {
            return Err(ClusterError::NotFound(format!("object {}", request.object.hash)));
        }
        for tag in request.tags {
            state.tags.insert(
                tag.name.clone(),
                TagInfo {
                    tag,
                    object: request.object.clone(),
                },
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Enterprise
// ---------------------------------------------------------------------------

#[async_trait]
impl EnterpriseApi for MemoryCluster {
    async fn get_state(&self) -> Result<EnterpriseInfo> {
        Ok(self.state("get_state")?.enterprise.clone())
    }

    async fn activate(&self, request: ActivateEnterpriseRequest) -> Result<()> {
        let mut state = self.state("activate_enterprise")?;
        if request.activation_code.is_empty() {
            return Err(ClusterError::InvalidArgument(
                "activation code must be set".into(),
            ));
        }
        state.enterprise = EnterpriseInfo {
            state: EnterpriseState::Active,
            activation_code: request.activation_code,
            expires: None,
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[async_trait]
impl AuthApi for MemoryCluster {
    async fn who_am_i(&self, token: Option<&str>) -> Result<WhoAmI> {
        let state = self.state("who_am_i")?;
        let auth = state.auth()?;
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(ClusterError::NotAuthenticated)?;
        let record = auth
            .tokens
            .get(&hash_token(token))
            .ok_or(ClusterError::NotAuthenticated)?;
        let subject = record.token_info.subject.clone();
        if record.is_expired_at(Utc::now()) {
            return Err(ClusterError::ExpiredToken { subject });
        }
        let is_admin = auth
            .bindings
            .get(&subject)
            .is_some_and(ClusterRoles::is_super_admin);
        Ok(WhoAmI {
            username: subject,
            is_admin,
        })
    }

    async fn activate(&self, root_token: &str) -> Result<()> {
        let mut state = self.state("activate_auth")?;
        if state.auth.is_some() {
            return Err(ClusterError::AlreadyActivated);
        }
        if root_token.is_empty() {
            return Err(ClusterError::InvalidArgument("root token must be set".into()));
        }
        if state.enterprise.state != EnterpriseState::Active {
            return Err(ClusterError::FailedPrecondition(format!(
                "enterprise license is {}, not active",
                state.enterprise.state
            )));
        }
        let mut auth = AuthState {
            config: AuthConfig {
                live_config_version: 1,
                id_providers: Vec::new(),
            },
            ..AuthState::default()
        };
        auth.tokens.insert(
            hash_token(root_token),
            HashedAuthToken {
                hashed_token: hash_token(root_token),
                token_info: TokenInfo {
                    subject: ROOT_SUBJECT.to_owned(),
                    source: TokenSource::Authenticate,
                },
                expiration: None,
            },
        );
        auth.bindings
            .insert(ROOT_SUBJECT.to_owned(), ClusterRoles::super_admin());
        state.auth = Some(auth);
        tracing::debug!("auth activated");
        Ok(())
    }

    async fn get_configuration(&self) -> Result<AuthConfig> {
        Ok(self.state("get_configuration")?.auth()?.config.clone())
    }

    async fn set_configuration(&self, request: SetConfigurationRequest) -> Result<()> {
        let mut state = self.state("set_configuration")?;
        let auth = state.auth_mut()?;
        let live = auth.config.live_config_version;
        let mut config = request.configuration;
        if config.live_config_version != 0 && config.live_config_version != live {
            return Err(ClusterError::Conflict(format!(
                "config version {} does not match live version {live}",
                config.live_config_version
            )));
        }
        config.live_config_version = live + 1;
        auth.config = config;
        Ok(())
    }

    async fn extract_tokens(&self) -> Result<Vec<HashedAuthToken>> {
        let state = self.state("extract_tokens")?;
        Ok(state
            .auth()?
            .tokens
            .values()
            .filter(|t| t.token_info.source == TokenSource::GetToken)
            .cloned()
            .collect())
    }

    async fn restore_token(&self, request: RestoreAuthTokenRequest) -> Result<()> {
        let mut state = self.state("restore_token")?;
        let auth = state.auth_mut()?;
        let token = request.token;
        if token.hashed_token.is_empty() {
            return Err(ClusterError::InvalidArgument("hashed token must be set".into()));
        }
        if token.is_expired_at(Utc::now()) {
            return Err(ClusterError::ExpiredToken {
                subject: token.token_info.subject,
            });
        }
        if auth.tokens.contains_key(&token.hashed_token) {
            return Err(ClusterError::AlreadyExists(format!(
                "token for {}",
                token.token_info.subject
            )));
        }
        auth.tokens.insert(token.hashed_token.clone(), token);
        Ok(())
    }

    async fn get_role_bindings(&self) -> Result<BTreeMap<String, ClusterRoles>> {
        Ok(self.state("get_role_bindings")?.auth()?.bindings.clone())
    }

    async fn modify_role_binding(&self, request: ModifyClusterRoleBindingRequest) -> Result<()> {
        let mut state = self.state("modify_role_binding")?;
        let auth = state.auth_mut()?;
        if request.principal.is_empty() {
            return Err(ClusterError::InvalidArgument("principal must be set".into()));
        }
        if request.roles.roles.is_empty() {
            auth.bindings.remove(&request.principal);
        } else {
            auth.bindings.insert(request.principal, request.roles);
        }
        Ok(())
    }

    async fn get_acl(&self, repo: &Repo) -> Result<AclEntries> {
        let state = self.state("get_acl")?;
        if !state.has_repo(&repo.name) {
            return Err(ClusterError::NotFound(format!("repo {repo}")));
        }
        Ok(state
            .auth()?
            .acls
            .get(&repo.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_acl(&self, request: SetAclRequest) -> Result<()> {
        let mut state = self.state("set_acl")?;
        if !state.has_repo(&request.repo) {
            return Err(ClusterError::NotFound(format!("repo {}", request.repo)));
        }
        let auth = state.auth_mut()?;
        if request.entries.is_empty() {
            auth.acls.remove(&request.repo);
        } else {
            auth.acls.insert(request.repo, request.entries);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use metavault_types::auth::Scope;
    use metavault_types::pfs::CommitProvenance;

    fn build(repo: &str, id: &str, parent: &str) -> BuildCommitRequest {
        let repo = Repo::new(repo);
        let parent = if parent.is_empty() {
            Commit::root_of(&repo)
        } else {
            Commit::new(repo.name.clone(), parent)
        };
        BuildCommitRequest {
            parent,
            id: id.into(),
            origin: OriginKind::User,
            trees: Vec::new(),
            datums: None,
            size_bytes: 0,
            provenance: Vec::new(),
            started: None,
            finished: Some(Utc::now()),
        }
    }

    async fn cluster_with_repo(name: &str) -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster
            .create_repo(CreateRepoRequest {
                repo: Repo::new(name),
                description: String::new(),
            })
            .await
            .unwrap();
        cluster
    }

    async fn activated() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        EnterpriseApi::activate(
            &cluster,
            ActivateEnterpriseRequest {
                activation_code: "code".into(),
            },
        )
        .await
        .unwrap();
        AuthApi::activate(&cluster, "root-token").await.unwrap();
        cluster
    }

    #[tokio::test]
    async fn spec_repo_is_hidden_from_listing() {
        let cluster = cluster_with_repo("images").await;
        let repos = cluster.list_repos().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].repo.name, "images");
        assert!(cluster.inspect_repo(&Repo::new(SPEC_REPO)).await.is_ok());
    }

    #[tokio::test]
    async fn repos_list_newest_first() {
        let cluster = cluster_with_repo("a").await;
        cluster
            .create_repo(CreateRepoRequest {
                repo: Repo::new("b"),
                description: String::new(),
            })
            .await
            .unwrap();
        let names: Vec<_> = cluster
            .list_repos()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.repo.name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn duplicate_repo_already_exists() {
        let cluster = cluster_with_repo("images").await;
        let err = cluster
            .create_repo(CreateRepoRequest {
                repo: Repo::new("images"),
                description: String::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn commit_requires_parent() {
        let cluster = cluster_with_repo("r").await;
        let err = cluster.build_commit(build("r", "c2", "c1")).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(ref m) if m.contains("parent commit r@c1")));

        cluster.build_commit(build("r", "c1", "")).await.unwrap();
        cluster.build_commit(build("r", "c2", "c1")).await.unwrap();
        let c2 = cluster.inspect_commit(&Commit::new("r", "c2")).await.unwrap();
        assert_eq!(c2.parent_commit, Some(Commit::new("r", "c1")));
        let c1 = cluster.inspect_commit(&Commit::new("r", "c1")).await.unwrap();
        assert_eq!(c1.parent_commit, None);
    }

    #[tokio::test]
    async fn commit_requires_provenance() {
        let cluster = cluster_with_repo("r").await;
        let mut req = build("r", "c1", "");
        req.provenance.push(CommitProvenance {
            commit: Commit::new("upstream", "x"),
            branch: Branch::new("upstream", "master"),
        });
        let err = cluster.build_commit(req).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(_)));
    }

    #[tokio::test]
    async fn commits_list_in_creation_order() {
        let cluster = cluster_with_repo("r").await;
        cluster.build_commit(build("r", "c1", "")).await.unwrap();
        cluster.build_commit(build("r", "c2", "c1")).await.unwrap();
        let ids: Vec<String> = cluster
            .list_commits()
            .map_ok(|c| c.commit.id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn branches_move_in_place_and_list_both_ways() {
        let cluster = cluster_with_repo("r").await;
        cluster.build_commit(build("r", "c1", "")).await.unwrap();
        cluster.build_commit(build("r", "c2", "c1")).await.unwrap();
        for (name, head) in [("master", "c1"), ("dev", "c1"), ("master", "c2")] {
            cluster
                .create_branch(CreateBranchRequest {
                    branch: Branch::new("r", name),
                    head: Some(Commit::new("r", head)),
                    provenance: Vec::new(),
                })
                .await
                .unwrap();
        }
        let oldest_first: Vec<_> = cluster
            .list_branches(true)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.branch.name)
            .collect();
        assert_eq!(oldest_first, vec!["master", "dev"]);
        let newest_first = cluster.list_branches(false).await.unwrap();
        assert_eq!(newest_first[0].branch.name, "dev");
        let master = cluster.inspect_branch(&Branch::new("r", "master")).await.unwrap();
        assert_eq!(master.head, Some(Commit::new("r", "c2")));
    }

    #[tokio::test]
    async fn pipeline_requires_inputs_and_freezes_spec() {
        let cluster = MemoryCluster::new();
        let request = CreatePipelineRequest {
            pipeline: Pipeline::new("edges"),
            transform: Default::default(),
            parallelism_spec: None,
            input: Some(Input::pfs("images", "/*")),
            output_branch: String::new(),
            description: String::new(),
            enable_stats: false,
            spec_commit: None,
            update: false,
            reprocess: false,
        };
        let err = cluster.create_pipeline(request.clone()).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(ref m) if m.contains("images")));

        cluster
            .create_repo(CreateRepoRequest {
                repo: Repo::new("images"),
                description: String::new(),
            })
            .await
            .unwrap();
        cluster.create_pipeline(request.clone()).await.unwrap();
        let info = cluster.inspect_pipeline(&Pipeline::new("edges")).await.unwrap();
        let spec_commit = info.spec_commit.unwrap();
        assert_eq!(spec_commit.repo.name, SPEC_REPO);
        assert!(cluster.inspect_commit(&spec_commit).await.is_ok());
        assert!(cluster.inspect_repo(&Repo::new("edges")).await.is_ok());
        assert_eq!(info.output_branch, "master");

        let err = cluster.create_pipeline(request).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn blocks_are_content_addressed() {
        let cluster = MemoryCluster::new();
        let object = cluster.store_object(Bytes::from_static(b"hello")).unwrap();
        let block = Block::new(object.hash.clone());
        assert_eq!(block.hash.len(), 128);
        assert_eq!(cluster.get_block(&block).await.unwrap(), Bytes::from_static(b"hello"));

        let err = cluster
            .put_block(PutBlockRequest {
                block: Block::new("0000"),
                data: Bytes::from_static(b"hello"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn object_requires_block() {
        let cluster = MemoryCluster::new();
        let err = cluster
            .create_object(CreateObjectRequest {
                object: Object::new("o"),
                block_ref: BlockRef {
                    block: Block::new("missing"),
                    range: ByteRange::default(),
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NotFound(_)));
    }

    #[tokio::test]
    async fn who_am_i_reports_not_activated() {
        let cluster = MemoryCluster::new();
        let err = cluster.who_am_i(Some("anything")).await.unwrap_err();
        assert_eq!(err, ClusterError::NotActivated);
    }

    #[tokio::test]
    async fn auth_requires_active_enterprise() {
        let cluster = MemoryCluster::new();
        let err = AuthApi::activate(&cluster, "root").await.unwrap_err();
        assert!(matches!(err, ClusterError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn root_token_is_admin_and_robots_are_not() {
        let cluster = activated().await;
        let root = cluster.who_am_i(Some("root-token")).await.unwrap();
        assert_eq!(root.username, ROOT_SUBJECT);
        assert!(root.is_admin);

        let robot = cluster.issue_token("robot:ci", None).unwrap();
        let who = cluster.who_am_i(Some(&robot)).await.unwrap();
        assert!(!who.is_admin);

        let err = cluster.who_am_i(None).await.unwrap_err();
        assert_eq!(err, ClusterError::NotAuthenticated);
    }

    #[tokio::test]
    async fn only_robot_tokens_are_extracted_and_stored_hashed() {
        let cluster = activated().await;
        let robot = cluster.issue_token("robot:ci", None).unwrap();
        let tokens = cluster.extract_tokens().await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].hashed_token, hash_token(&robot));
        assert_ne!(tokens[0].hashed_token, robot);
    }

    #[tokio::test]
    async fn restoring_expired_token_fails() {
        let cluster = activated().await;
        let err = cluster
            .restore_token(RestoreAuthTokenRequest {
                token: HashedAuthToken {
                    hashed_token: "abc".into(),
                    token_info: TokenInfo {
                        subject: "robot:old".into(),
                        source: TokenSource::GetToken,
                    },
                    expiration: Some(Utc::now() - chrono::Duration::hours(1)),
                },
            })
            .await
            .unwrap_err();
        assert!(err.is_expired_token());
    }

    #[tokio::test]
    async fn config_version_zero_always_writes() {
        let cluster = activated().await;
        let stale = SetConfigurationRequest {
            configuration: AuthConfig {
                live_config_version: 7,
                id_providers: Vec::new(),
            },
        };
        let err = cluster.set_configuration(stale).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict(_)));

        cluster
            .set_configuration(SetConfigurationRequest {
                configuration: AuthConfig::default(),
            })
            .await
            .unwrap();
        let config = cluster.get_configuration().await.unwrap();
        assert_eq!(config.live_config_version, 2);
    }

    #[tokio::test]
    async fn acls_round_trip() {
        let cluster = activated().await;
        cluster
            .create_repo(CreateRepoRequest {
                repo: Repo::new("images"),
                description: String::new(),
            })
            .await
            .unwrap();
        let mut entries = AclEntries::new();
        entries.insert("robot:ci".into(), Scope::Writer);
        cluster
            .set_acl(SetAclRequest {
                repo: "images".into(),
                entries: entries.clone(),
            })
            .await
            .unwrap();
        assert_eq!(cluster.get_acl(&Repo::new("images")).await.unwrap(), entries);
    }

    #[tokio::test]
    async fn injected_fault_fails_the_named_call() {
        let cluster = MemoryCluster::new();
        cluster.inject_fault("list_repos");
        let err = cluster.list_repos().await.unwrap_err();
        assert!(matches!(err, ClusterError::Unavailable(_)));
        assert!(cluster.list_pipelines().await.is_ok());
    }
}
