//! Shared cluster fixtures for the admin integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::TryStreamExt;
use metavault_admin::config::AdminConfig;
use metavault_admin::AdminServer;
use metavault_cluster::{
    AuthApi, ClusterClient, EnterpriseApi, MemoryCluster, ObjectApi, PfsApi, PpsApi,
};
use metavault_store::ObjectStores;
use metavault_types::auth::{
    AclEntries, ClusterRole, ClusterRoles, IdProvider, ModifyClusterRoleBindingRequest, Scope,
    SetAclRequest, SetConfigurationRequest, AuthConfig,
};
use metavault_types::enterprise::{ActivateEnterpriseRequest, EnterpriseInfo};
use metavault_types::pfs::{
    Block, Branch, BranchInfo, BuildCommitRequest, Commit, CommitInfo, CommitProvenance,
    CreateBranchRequest, CreateRepoRequest, ObjectInfo, OriginKind, Repo, Tag, TagInfo,
    TagObjectRequest,
};
use metavault_types::pps::{
    CreateJobRequest, CreatePipelineRequest, DatumCounts, Input, JobState, Pipeline,
    ProcessStats, Transform,
};

pub const SOURCE_ROOT_TOKEN: &str = "source-root";
pub const TARGET_ROOT_TOKEN: &str = "target-root";

pub fn server(cluster: &Arc<MemoryCluster>, stores: ObjectStores) -> AdminServer {
    AdminServer::new(ClusterClient::from_shared(cluster.clone()), AdminConfig::default())
        .with_object_stores(stores)
}

pub fn commit(repo: &str, id: &str, parent: Option<&str>) -> BuildCommitRequest {
    let repo = Repo::new(repo);
    let parent = match parent {
        Some(parent) => Commit::new(repo.name.clone(), parent),
        None => Commit::root_of(&repo),
    };
    let now = Utc::now();
    BuildCommitRequest {
        parent,
        id: id.into(),
        origin: OriginKind::User,
        trees: Vec::new(),
        datums: None,
        size_bytes: 128,
        provenance: Vec::new(),
        started: Some(now - Duration::seconds(5)),
        finished: Some(now),
    }
}

pub fn pipeline(name: &str, input: Input) -> CreatePipelineRequest {
    CreatePipelineRequest {
        pipeline: Pipeline::new(name),
        transform: Transform {
            image: "alpine:3".into(),
            cmd: vec!["sh".into()],
            stdin: vec![format!("cp -r /pfs/* /pfs/out/ # {name}")],
            env: Default::default(),
        },
        parallelism_spec: None,
        input: Some(input),
        output_branch: String::new(),
        description: format!("pipeline {name}"),
        enable_stats: false,
        spec_commit: None,
        update: false,
        reprocess: false,
    }
}

pub async fn create_repo(cluster: &MemoryCluster, name: &str) {
    cluster
        .create_repo(CreateRepoRequest {
            repo: Repo::new(name),
            description: format!("{name} data"),
        })
        .await
        .unwrap();
}

pub async fn branch(cluster: &MemoryCluster, repo: &str, name: &str, head: &str, provenance: Vec<Branch>) {
    cluster
        .create_branch(CreateBranchRequest {
            branch: Branch::new(repo, name),
            head: Some(Commit::new(repo, head)),
            provenance,
        })
        .await
        .unwrap();
}

/// Repo `R` with commits `c1 -> c2`, `master` at `c2`, and pipeline `P`
/// reading `R`.
pub async fn example_cluster() -> MemoryCluster {
    let cluster = MemoryCluster::new();
    create_repo(&cluster, "R").await;
    cluster.build_commit(commit("R", "c1", None)).await.unwrap();
    cluster.build_commit(commit("R", "c2", Some("c1"))).await.unwrap();
    branch(&cluster, "R", "master", "c2", Vec::new()).await;
    cluster
        .create_pipeline(pipeline("P", Input::pfs("R", "/*")))
        .await
        .unwrap();
    cluster
}

/// The example cluster plus objects, a downstream pipeline, jobs and
/// provenance between output commits.
pub async fn full_cluster() -> MemoryCluster {
    let cluster = example_cluster().await;

    let object = cluster.store_object(b"hello world".to_vec()).unwrap();
    cluster.store_object(b"second object".to_vec()).unwrap();
    cluster
        .tag_object(TagObjectRequest {
            object,
            tags: vec![Tag::new("greeting")],
        })
        .await
        .unwrap();

    let mut out = commit("P", "o1", None);
    out.provenance = vec![CommitProvenance {
        commit: Commit::new("R", "c2"),
        branch: Branch::new("R", "master"),
    }];
    cluster.build_commit(out).await.unwrap();
    branch(&cluster, "P", "master", "o1", vec![Branch::new("R", "master")]).await;

    cluster
        .create_pipeline(pipeline(
            "Q",
            Input::Cross(vec![Input::pfs("P", "/"), Input::pfs("R", "/*")]),
        ))
        .await
        .unwrap();

    for state in [JobState::Failure, JobState::Success] {
        cluster
            .create_job(CreateJobRequest {
                pipeline: Pipeline::new("P"),
                output_commit: Some(Commit::new("P", "o1")),
                stats_commit: None,
                restart: 1,
                data: DatumCounts {
                    processed: 3,
                    skipped: 1,
                    total: 4,
                    failed: 0,
                    recovered: 0,
                },
                stats: ProcessStats {
                    download_bytes: 10,
                    upload_bytes: 20,
                },
                state,
                reason: String::new(),
                started: Some(Utc::now()),
                finished: Some(Utc::now()),
            })
            .await
            .unwrap();
    }
    cluster
}

pub async fn activate_enterprise(cluster: &MemoryCluster) {
    EnterpriseApi::activate(
        cluster,
        ActivateEnterpriseRequest {
            activation_code: "license-code".into(),
        },
    )
    .await
    .unwrap();
}

/// Turn on enterprise and auth, then add a robot, a binding, an identity
/// provider and an ACL.
pub async fn enable_auth(cluster: &MemoryCluster) -> String {
    activate_enterprise(cluster).await;
    AuthApi::activate(cluster, SOURCE_ROOT_TOKEN).await.unwrap();
    let robot = cluster.issue_token("robot:ci", None).unwrap();
    cluster
        .modify_role_binding(ModifyClusterRoleBindingRequest {
            principal: "robot:ci".into(),
            roles: ClusterRoles {
                roles: vec![ClusterRole::FsAdmin],
            },
        })
        .await
        .unwrap();
    cluster
        .set_configuration(SetConfigurationRequest {
            configuration: AuthConfig {
                live_config_version: 0,
                id_providers: vec![IdProvider {
                    name: "okta".into(),
                    description: "corporate SSO".into(),
                }],
            },
        })
        .await
        .unwrap();
    cluster
        .set_acl(SetAclRequest {
            repo: "R".into(),
            entries: AclEntries::from([("robot:ci".to_owned(), Scope::Writer)]),
        })
        .await
        .unwrap();
    robot
}

/// Everything a restore is expected to carry over, in comparable form.
#[derive(Debug, PartialEq)]
pub struct Snapshot {
    pub repos: Vec<String>,
    pub commits: Vec<CommitInfo>,
    pub branches: Vec<BranchInfo>,
    pub pipelines: Vec<CreatePipelineRequest>,
    pub jobs: Vec<CreateJobRequest>,
    pub blocks: Vec<Block>,
    pub objects: Vec<ObjectInfo>,
    pub tags: Vec<TagInfo>,
    pub enterprise: EnterpriseInfo,
}

pub async fn snapshot(cluster: &MemoryCluster) -> Snapshot {
    let repos = cluster
        .list_repos()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.repo.name)
        .collect();
    let mut pipelines = Vec::new();
    let mut jobs = Vec::new();
    for info in cluster.list_pipelines().await.unwrap() {
        let mut request = CreatePipelineRequest::from_info(&info);
        request.spec_commit = info.spec_commit.clone();
        pipelines.push(request);
        let infos: Vec<_> = cluster.list_jobs(&info.pipeline).try_collect().await.unwrap();
        jobs.extend(infos.iter().map(|job| CreateJobRequest::from_info(&info.pipeline, job)));
    }
    Snapshot {
        repos,
        commits: cluster.list_commits().try_collect().await.unwrap(),
        branches: cluster.list_branches(false).await.unwrap(),
        pipelines,
        jobs,
        blocks: cluster.list_blocks().try_collect().await.unwrap(),
        objects: cluster.list_objects().try_collect().await.unwrap(),
        tags: cluster.list_tags().try_collect().await.unwrap(),
        enterprise: cluster.get_state().await.unwrap(),
    }
}
