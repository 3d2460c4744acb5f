use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use futures::TryStreamExt;
use metavault_admin::transport::extract_channel;
use metavault_admin::{AdminServer, CallContext};
use metavault_cluster::{ClusterClient, MemoryCluster, ObjectApi, PfsApi, PpsApi};
use metavault_types::compression::CompressionCodec;
use metavault_types::pfs::{
    Branch, BuildCommitRequest, Commit, CreateBranchRequest, CreateRepoRequest, OriginKind, Repo,
};
use metavault_types::pps::{CreatePipelineRequest, Input, Pipeline, Transform};
use metavault_types::{ExtractRequest, RestoreRequest};

use super::load_config;

/// Execute the `selftest` command: extract a sample cluster into a dump
/// and restore it into an empty cluster, then compare the two.
pub async fn execute(config: Option<&Path>, codec: Option<CompressionCodec>) -> Result<()> {
    let start = Instant::now();
    let scratch_needed = config.is_none();
    let mut config = load_config(config)?;
    if let Some(codec) = codec {
        config.compression.codec = codec;
    }
    let _scratch = if scratch_needed {
        let dir = tempfile::tempdir().context("Failed to create scratch directory")?;
        config.object_store.local_root = dir.path().to_path_buf();
        Some(dir)
    } else {
        None
    };

    let source = Arc::new(MemoryCluster::with_spec_repo(config.spec_repo.clone()));
    populate(&source).await.context("Failed to build sample cluster")?;
    tracing::info!(
        codec = %config.compression.codec,
        local_root = %config.object_store.local_root.display(),
        "Sample cluster built"
    );
    let target = Arc::new(MemoryCluster::with_spec_repo(config.spec_repo.clone()));

    let url = format!(
        "local://selftest/dump-{}",
        Utc::now().format("%Y%m%dT%H%M%S%.3f")
    );
    let ctx = CallContext::new();

    let extractor = AdminServer::new(ClusterClient::from_shared(source.clone()), config.clone());
    let (mut stream, _rx) = extract_channel(config.transport.channel_capacity);
    let written = extractor
        .extract(&ctx, &ExtractRequest::all().with_url(url.clone()), &mut stream)
        .await
        .context("Extract failed")?;
    tracing::info!(%url, operations = written, "Sample cluster extracted");
    println!("Extracted {written} operation(s) to {url}");

    let restorer = AdminServer::new(ClusterClient::from_shared(target.clone()), config);
    let applied = restorer
        .restore_from(&ctx, [RestoreRequest::Url(url)])
        .await
        .context("Restore failed")?;
    tracing::info!(operations = applied, "Sample cluster restored");
    println!("Restored {applied} operation(s)");

    let before = Summary::of(source.as_ref()).await?;
    let after = Summary::of(target.as_ref()).await?;
    before.print_against(&after);
    if before != after {
        anyhow::bail!("Restored cluster does not match the source");
    }

    println!("Selftest: OK ({:.2}s)", start.elapsed().as_secs_f64());
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct Summary {
    repos: Vec<String>,
    commits: Vec<String>,
    branches: Vec<String>,
    pipelines: Vec<String>,
    objects: usize,
}

impl Summary {
    async fn of(cluster: &MemoryCluster) -> Result<Self> {
        let mut repos: Vec<String> = PfsApi::list_repos(cluster)
            .await?
            .into_iter()
            .map(|info| info.repo.name)
            .collect();
        let mut commits: Vec<String> = cluster
            .list_commits()
            .map_ok(|info| format!("{}@{}", info.commit.repo.name, info.commit.id))
            .try_collect()
            .await?;
        let mut branches: Vec<String> = cluster
            .list_branches(false)
            .await?
            .into_iter()
            .map(|info| format!("{}@{}", info.branch.repo.name, info.branch.name))
            .collect();
        let mut pipelines: Vec<String> = cluster
            .list_pipelines()
            .await?
            .into_iter()
            .map(|info| info.pipeline.name)
            .collect();
        let objects = cluster.list_objects().try_collect::<Vec<_>>().await?.len();

        repos.sort();
        commits.sort();
        branches.sort();
        pipelines.sort();
        Ok(Self {
            repos,
            commits,
            branches,
            pipelines,
            objects,
        })
    }

    fn print_against(&self, restored: &Self) {
        let rows = [
            ("repos", self.repos.len(), restored.repos.len()),
            ("commits", self.commits.len(), restored.commits.len()),
            ("branches", self.branches.len(), restored.branches.len()),
            ("pipelines", self.pipelines.len(), restored.pipelines.len()),
            ("objects", self.objects, restored.objects),
        ];
        for (name, source, target) in rows {
            println!("  {name:<10} {source:>4} -> {target}");
        }
    }
}

/// Repo `images` with two commits on `master`, a pipeline `edges` reading
/// it, and one stored object.
async fn populate(cluster: &MemoryCluster) -> Result<()> {
    cluster.store_object(b"selftest object".to_vec())?;

    cluster
        .create_repo(CreateRepoRequest {
            repo: Repo::new("images"),
            description: "sample input".into(),
        })
        .await?;

    let repo = Repo::new("images");
    let now = Utc::now();
    let mut parent = Commit::root_of(&repo);
    for id in ["c1", "c2"] {
        cluster
            .build_commit(BuildCommitRequest {
                parent: parent.clone(),
                id: id.into(),
                origin: OriginKind::User,
                trees: Vec::new(),
                datums: None,
                size_bytes: 64,
                provenance: Vec::new(),
                started: Some(now - Duration::seconds(1)),
                finished: Some(now),
            })
            .await?;
        parent = Commit::new("images", id);
    }
    cluster
        .create_branch(CreateBranchRequest {
            branch: Branch::new("images", "master"),
            head: Some(parent),
            provenance: Vec::new(),
        })
        .await?;

    cluster
        .create_pipeline(CreatePipelineRequest {
            pipeline: Pipeline::new("edges"),
            transform: Transform {
                image: "alpine:3".into(),
                cmd: vec!["sh".into()],
                stdin: vec!["cp -r /pfs/images/* /pfs/out/".into()],
                env: Default::default(),
            },
            parallelism_spec: None,
            input: Some(Input::pfs("images", "/*")),
            output_branch: String::new(),
            description: "sample pipeline".into(),
            enable_stats: false,
            spec_commit: None,
            update: false,
            reprocess: false,
        })
        .await?;
    Ok(())
}
