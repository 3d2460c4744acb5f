//! Walk a live cluster and emit the operations that recreate it.
//!
//! Phases run in a fixed order so that every operation only refers to
//! facts emitted before it:
//!
//! 1. blocks, objects, tags
//!    (a block is sent as payload chunks followed by an empty closing chunk)
//! 2. auth token check marker
//! 3. repositories, commits, branches
//! 4. pipelines (provenance order), each followed by its jobs
//! 5. enterprise license
//! 6. auth activation, tokens, role bindings, auth config, repo ACLs
//!
//! Each phase can be switched off by the request. Any failure aborts the
//! extract; whatever was already written stays written.

use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use metavault_cluster::ClusterClient;
use metavault_types::auth::{
    ActivateAuthRequest, CheckAuthTokenRequest, ModifyClusterRoleBindingRequest,
    RestoreAuthTokenRequest, SetAclRequest, SetConfigurationRequest,
};
use metavault_types::enterprise::{ActivateEnterpriseRequest, EnterpriseState};
use metavault_types::pfs::{
    BuildCommitRequest, Commit, CommitInfo, CreateBranchRequest, CreateObjectRequest,
    CreateRepoRequest, PutBlockRequest, Repo, RepoInfo, TagObjectRequest,
};
use metavault_types::pps::{CreateJobRequest, CreatePipelineRequest, Pipeline, PipelineInfo};
use metavault_types::{Envelope, ExtractRequest, Op, OpV1_12};

use crate::error::{AdminError, Result};
use crate::sink::OpSink;
use crate::sorter::sort_pipelines;

/// Produces the operation stream for one cluster.
#[derive(Debug)]
pub struct Extractor<'a> {
    cluster: &'a ClusterClient,
    spec_repo: &'a str,
    auth_enabled: bool,
    block_chunk_bytes: usize,
}

/// Block payload carried by one `CreateBlock` operation, by default.
pub const DEFAULT_BLOCK_CHUNK_BYTES: usize = 32 * 1024 * 1024;

impl<'a> Extractor<'a> {
    /// Extractor for a cluster without auth. See [`with_auth`](Self::with_auth).
    #[must_use]
    pub fn new(cluster: &'a ClusterClient, spec_repo: &'a str) -> Self {
        Self {
            cluster,
            spec_repo,
            auth_enabled: false,
            block_chunk_bytes: DEFAULT_BLOCK_CHUNK_BYTES,
        }
    }

    /// Split block payloads into operations of at most `bytes` bytes each.
    #[must_use]
    pub fn with_block_chunk_bytes(mut self, bytes: usize) -> Self {
        self.block_chunk_bytes = bytes.max(1);
        self
    }

    /// Whether the cluster has auth on, which adds the auth phases.
    #[must_use]
    pub fn with_auth(mut self, enabled: bool) -> Self {
        self.auth_enabled = enabled;
        self
    }

    /// Emit every phase `request` leaves enabled into `sink`.
    ///
    /// # Errors
    ///
    /// Returns the first cluster, encoding or sink error.
    pub async fn run(&self, request: &ExtractRequest, sink: &mut dyn OpSink) -> Result<()> {
        let with_auth = self.auth_enabled && !request.no_auth;

        if !request.no_objects {
            self.objects(sink).await?;
        }
        if with_auth {
            self.auth_precheck(sink).await?;
        }
        let repos = if request.no_repos {
            Vec::new()
        } else {
            self.repos(sink).await?
        };
        if !request.no_pipelines {
            self.pipelines(sink).await?;
        }
        if !request.no_enterprise {
            self.enterprise(sink).await?;
        }
        if with_auth {
            self.auth(sink, &repos).await?;
        }
        Ok(())
    }

    /// The creation operation for one pipeline. Unlike a full extract, the
    /// spec commit is not attached: the request recreates the pipeline from
    /// its current spec.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline can't be inspected.
    pub async fn pipeline_op(&self, pipeline: &Pipeline) -> Result<Envelope> {
        let info = self
            .cluster
            .pps
            .inspect_pipeline(pipeline)
            .await
            .map_err(|e| AdminError::cluster("error inspecting pipeline", e))?;
        let request = CreatePipelineRequest::from_info(&info);
        Ok(Envelope::encode(&Op::V1_12(OpV1_12::CreatePipeline(request)))?)
    }

    async fn objects(&self, sink: &mut dyn OpSink) -> Result<()> {
        let objects = &self.cluster.objects;

        let mut blocks = objects.list_blocks();
        while let Some(block) = blocks
            .try_next()
            .await
            .map_err(|e| AdminError::cluster("error listing blocks", e))?
        {
            let data = objects
                .get_block(&block)
                .await
                .map_err(|e| AdminError::cluster("error reading block", e))?;
            let mut offset = 0;
            while offset < data.len() {
                let end = data.len().min(offset + self.block_chunk_bytes);
                let chunk = PutBlockRequest {
                    block: block.clone(),
                    data: data.slice(offset..end),
                };
                emit(sink, OpV1_12::CreateBlock(chunk)).await?;
                offset = end;
            }
            let close = PutBlockRequest {
                block,
                data: Bytes::new(),
            };
            emit(sink, OpV1_12::CreateBlock(close)).await?;
        }

        let mut infos = objects.list_objects();
        while let Some(info) = infos
            .try_next()
            .await
            .map_err(|e| AdminError::cluster("error listing objects", e))?
        {
            let op = CreateObjectRequest {
                object: info.object,
                block_ref: info.block_ref,
            };
            emit(sink, OpV1_12::CreateObject(op)).await?;
        }

        let mut tags = objects.list_tags();
        while let Some(tag) = tags
            .try_next()
            .await
            .map_err(|e| AdminError::cluster("error listing tags", e))?
        {
            let op = TagObjectRequest {
                object: tag.object,
                tags: vec![tag.tag],
            };
            emit(sink, OpV1_12::TagObject(op)).await?;
        }
        Ok(())
    }

    async fn auth_precheck(&self, sink: &mut dyn OpSink) -> Result<()> {
        self.cluster
            .auth
            .get_configuration()
            .await
            .map_err(|e| AdminError::cluster("error getting auth configuration", e))?;
        emit(sink, OpV1_12::CheckAuthToken(CheckAuthTokenRequest {})).await
    }

    /// Returns the repositories in the order they were emitted.
    async fn repos(&self, sink: &mut dyn OpSink) -> Result<Vec<Repo>> {
        let pfs = &self.cluster.pfs;

        let mut infos = pfs
            .list_repos()
            .await
            .map_err(|e| AdminError::cluster("error listing repos", e))?;
        infos.push(RepoInfo::named(self.spec_repo));
        infos.reverse();
        let mut repos = Vec::with_capacity(infos.len());
        for info in infos {
            repos.push(info.repo.clone());
            let op = CreateRepoRequest {
                repo: info.repo,
                description: info.description,
            };
            emit(sink, OpV1_12::CreateRepo(op)).await?;
        }

        let mut commits = pfs.list_commits();
        while let Some(info) = commits
            .try_next()
            .await
            .map_err(|e| AdminError::cluster("error listing commits", e))?
        {
            emit(sink, OpV1_12::BuildCommit(build_commit(info))).await?;
        }

        let branches = pfs
            .list_branches(true)
            .await
            .map_err(|e| AdminError::cluster("error listing branches", e))?;
        for info in branches {
            let op = CreateBranchRequest {
                branch: info.branch,
                head: info.head,
                provenance: info.direct_provenance,
            };
            emit(sink, OpV1_12::CreateBranch(op)).await?;
        }
        Ok(repos)
    }

    async fn pipelines(&self, sink: &mut dyn OpSink) -> Result<()> {
        let pps = &self.cluster.pps;
        let infos = pps
            .list_pipelines()
            .await
            .map_err(|e| AdminError::cluster("error listing pipelines", e))?;
        for info in sort_pipelines(infos)? {
            emit(sink, OpV1_12::CreatePipeline(create_pipeline(&info))).await?;

            let mut jobs = pps.list_jobs(&info.pipeline);
            while let Some(job) = jobs
                .try_next()
                .await
                .map_err(|e| AdminError::cluster("error listing jobs", e))?
            {
                let op = CreateJobRequest::from_info(&info.pipeline, &job);
                emit(sink, OpV1_12::CreateJob(op)).await?;
            }
        }
        Ok(())
    }

    async fn enterprise(&self, sink: &mut dyn OpSink) -> Result<()> {
        let info = self
            .cluster
            .enterprise
            .get_state()
            .await
            .map_err(|e| AdminError::cluster("error getting enterprise state", e))?;
        if info.state != EnterpriseState::Active {
            tracing::warn!(state = %info.state, "Enterprise license is not active, skipping it");
            return Ok(());
        }
        let op = ActivateEnterpriseRequest {
            activation_code: info.activation_code,
        };
        emit(sink, OpV1_12::ActivateEnterprise(op)).await
    }

    async fn auth(&self, sink: &mut dyn OpSink, repos: &[Repo]) -> Result<()> {
        let auth = &self.cluster.auth;

        let mut config = auth
            .get_configuration()
            .await
            .map_err(|e| AdminError::cluster("error getting auth configuration", e))?;
        emit(sink, OpV1_12::ActivateAuth(ActivateAuthRequest::default())).await?;

        let tokens = auth
            .extract_tokens()
            .await
            .map_err(|e| AdminError::cluster("error extracting auth tokens", e))?;
        let now = Utc::now();
        for token in tokens {
            if token.is_expired_at(now) {
                tracing::warn!(
                    subject = %token.token_info.subject,
                    "Auth token has already expired, not extracting it"
                );
                continue;
            }
            emit(sink, OpV1_12::RestoreAuthToken(RestoreAuthTokenRequest { token })).await?;
        }

        let bindings = auth
            .get_role_bindings()
            .await
            .map_err(|e| AdminError::cluster("error getting cluster role bindings", e))?;
        for (principal, roles) in bindings {
            let op = ModifyClusterRoleBindingRequest { principal, roles };
            emit(sink, OpV1_12::SetClusterRoleBinding(op)).await?;
        }

        config.live_config_version = 0;
        let op = SetConfigurationRequest {
            configuration: config,
        };
        emit(sink, OpV1_12::SetAuthConfig(op)).await?;

        for repo in repos {
            let entries = auth
                .get_acl(repo)
                .await
                .map_err(|e| AdminError::cluster("error getting repo ACL", e))?;
            let op = SetAclRequest {
                repo: repo.name.clone(),
                entries,
            };
            emit(sink, OpV1_12::SetAcl(op)).await?;
        }
        Ok(())
    }
}

async fn emit(sink: &mut dyn OpSink, op: OpV1_12) -> Result<()> {
    let envelope = Envelope::encode(&Op::V1_12(op))?;
    sink.write(envelope).await
}

/// Creation request for `info` with its frozen spec attached.
fn create_pipeline(info: &PipelineInfo) -> CreatePipelineRequest {
    let mut request = CreatePipelineRequest::from_info(info);
    request.spec_commit.clone_from(&info.spec_commit);
    request
}

/// Commit facts become build requests with an explicit parent and a
/// finish time.
fn build_commit(info: CommitInfo) -> BuildCommitRequest {
    let parent = info
        .parent_commit
        .unwrap_or_else(|| Commit::root_of(&info.commit.repo));
    let finished = info.finished.or_else(|| {
        tracing::warn!(
            commit = %info.commit,
            "Commit is still open, its data will not be extracted"
        );
        Some(Utc::now())
    });
    BuildCommitRequest {
        parent,
        id: info.commit.id,
        origin: info.origin,
        trees: info.trees,
        datums: info.datums,
        size_bytes: info.size_bytes,
        provenance: info.provenance,
        started: info.started,
        finished,
    }
}
