//! End-to-end extract and restore between two in-memory clusters, over
//! the call stream and through object-store URLs.

mod common;

use std::sync::Arc;

use common::{
    enable_auth, example_cluster, full_cluster, server, snapshot, SOURCE_ROOT_TOKEN,
    TARGET_ROOT_TOKEN,
};
use metavault_admin::config::types::{CompressionConfig, LimitsConfig};
use metavault_admin::config::AdminConfig;
use metavault_admin::{AdminServer, CallContext, ErrorKind};
use metavault_cluster::{AuthApi, ClusterClient, MemoryCluster, ObjectApi, PfsApi, PpsApi};
use metavault_store::{MemoryObjectStore, ObjectStores};
use metavault_types::compression::CompressionCodec;
use metavault_types::pfs::{Block, Branch, Commit, Repo};
use metavault_types::pps::Pipeline;
use metavault_types::{ExtractRequest, RestoreRequest};

fn mem_stores() -> (MemoryObjectStore, ObjectStores) {
    let store = MemoryObjectStore::new();
    let stores = ObjectStores::new().with("mem", Arc::new(store.clone()));
    (store, stores)
}

async fn stream_round_trip(source: &Arc<MemoryCluster>, target: &Arc<MemoryCluster>) -> u64 {
    let ops = server(source, ObjectStores::new())
        .extract_to_vec(&CallContext::new(), &ExtractRequest::all())
        .await
        .unwrap();
    let count = ops.len() as u64;
    let applied = server(target, ObjectStores::new())
        .restore_from(&CallContext::new(), ops.into_iter().map(RestoreRequest::Op))
        .await
        .unwrap();
    assert_eq!(applied, count);
    applied
}

/// The example cluster survives a round trip over the call stream.
#[tokio::test]
async fn test_example_scenario_over_stream() {
    let source = Arc::new(example_cluster().await);
    let target = Arc::new(MemoryCluster::new());
    stream_round_trip(&source, &target).await;

    assert_eq!(
        target.inspect_repo(&Repo::new("R")).await.unwrap().repo,
        Repo::new("R")
    );
    let c2 = target.inspect_commit(&Commit::new("R", "c2")).await.unwrap();
    assert_eq!(c2.parent_commit, Some(Commit::new("R", "c1")));
    let c1 = target.inspect_commit(&Commit::new("R", "c1")).await.unwrap();
    assert_eq!(c1.parent_commit, None);

    let master = target.inspect_branch(&Branch::new("R", "master")).await.unwrap();
    assert_eq!(master.head, Some(Commit::new("R", "c2")));

    let before = source.inspect_pipeline(&Pipeline::new("P")).await.unwrap();
    let after = target.inspect_pipeline(&Pipeline::new("P")).await.unwrap();
    assert_eq!(after.input, before.input);
    assert_eq!(after.transform, before.transform);
    assert_eq!(after.spec_commit, before.spec_commit);
    assert_eq!(snapshot(&target).await, snapshot(&source).await);
}

/// Objects, downstream pipelines, jobs and commit provenance all carry
/// over.
#[tokio::test]
async fn test_full_cluster_over_stream() {
    let source = Arc::new(full_cluster().await);
    let target = Arc::new(MemoryCluster::new());
    stream_round_trip(&source, &target).await;
    assert_eq!(snapshot(&target).await, snapshot(&source).await);

    let o1 = target.inspect_commit(&Commit::new("P", "o1")).await.unwrap();
    assert_eq!(o1.provenance.len(), 1);
    assert_eq!(o1.provenance[0].commit, Commit::new("R", "c2"));
}

/// Both codecs round-trip through an object URL, and the extract call
/// streams nothing back.
#[tokio::test]
async fn test_full_cluster_through_memory_url() {
    for codec in [CompressionCodec::Zstd, CompressionCodec::Lz4] {
        let source = Arc::new(full_cluster().await);
        let target = Arc::new(MemoryCluster::new());
        let (store, stores) = mem_stores();
        let config = AdminConfig {
            compression: CompressionConfig {
                codec,
                ..CompressionConfig::default()
            },
            ..AdminConfig::default()
        };
        let extractor = AdminServer::new(ClusterClient::from_shared(source.clone()), config)
            .with_object_stores(stores.clone());

        let request = ExtractRequest::all().with_url("mem://backups/cluster.dump");
        let streamed = extractor
            .extract_to_vec(&CallContext::new(), &request)
            .await
            .unwrap();
        assert!(streamed.is_empty());
        assert!(!store.get("backups", "cluster.dump").unwrap().is_empty());

        server(&target, stores)
            .restore_from(
                &CallContext::new(),
                [RestoreRequest::Url("mem://backups/cluster.dump".into())],
            )
            .await
            .unwrap();
        assert_eq!(snapshot(&target).await, snapshot(&source).await, "{codec}");
    }
}

/// Dumps written to a local directory restore from the same directory.
#[tokio::test]
async fn test_example_scenario_through_local_url() {
    let dir = tempfile::tempdir().unwrap();
    let config = AdminConfig {
        object_store: metavault_admin::config::types::ObjectStoreConfig {
            local_root: dir.path().to_path_buf(),
        },
        ..AdminConfig::default()
    };
    let source = Arc::new(example_cluster().await);
    let target = Arc::new(MemoryCluster::new());

    let request = ExtractRequest::all().with_url("local://backups/nightly/cluster.dump");
    AdminServer::new(ClusterClient::from_shared(source.clone()), config.clone())
        .extract_to_vec(&CallContext::new(), &request)
        .await
        .unwrap();
    assert!(dir.path().join("backups/nightly/cluster.dump").is_file());

    AdminServer::new(ClusterClient::from_shared(target.clone()), config)
        .restore_from(
            &CallContext::new(),
            [RestoreRequest::Url("local://backups/nightly/cluster.dump".into())],
        )
        .await
        .unwrap();
    assert_eq!(snapshot(&target).await, snapshot(&source).await);
}

/// Auth state moves with the data; the restoring caller's token becomes
/// the new root token.
#[tokio::test]
async fn test_auth_round_trip() {
    let source = Arc::new(full_cluster().await);
    enable_auth(&source).await;
    let target = Arc::new(MemoryCluster::new());

    let ops = server(&source, ObjectStores::new())
        .extract_to_vec(
            &CallContext::new().with_token(SOURCE_ROOT_TOKEN),
            &ExtractRequest::all(),
        )
        .await
        .unwrap();
    server(&target, ObjectStores::new())
        .restore_from(
            &CallContext::new().with_token(TARGET_ROOT_TOKEN),
            ops.into_iter().map(RestoreRequest::Op),
        )
        .await
        .unwrap();

    assert_eq!(snapshot(&target).await, snapshot(&source).await);
    assert_eq!(
        target.get_role_bindings().await.unwrap(),
        source.get_role_bindings().await.unwrap()
    );
    assert_eq!(
        target.extract_tokens().await.unwrap(),
        source.extract_tokens().await.unwrap()
    );
    assert_eq!(
        target.get_acl(&Repo::new("R")).await.unwrap(),
        source.get_acl(&Repo::new("R")).await.unwrap()
    );
    assert_eq!(
        target.get_configuration().await.unwrap().id_providers,
        source.get_configuration().await.unwrap().id_providers
    );

    let who = target.who_am_i(Some(TARGET_ROOT_TOKEN)).await.unwrap();
    assert!(who.is_admin);
    assert!(target.who_am_i(Some(SOURCE_ROOT_TOKEN)).await.is_err());
}

/// Restoring auth without a caller token fails at the token check, before
/// any repository is created.
#[tokio::test]
async fn test_auth_restore_requires_caller_token() {
    let source = Arc::new(example_cluster().await);
    enable_auth(&source).await;
    let target = Arc::new(MemoryCluster::new());

    let ops = server(&source, ObjectStores::new())
        .extract_to_vec(
            &CallContext::new().with_token(SOURCE_ROOT_TOKEN),
            &ExtractRequest::all(),
        )
        .await
        .unwrap();
    let err = server(&target, ObjectStores::new())
        .restore_from(&CallContext::new(), ops.into_iter().map(RestoreRequest::Op))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(target.list_repos().await.unwrap().is_empty());
}

/// Open commits are extracted finished.
#[tokio::test]
async fn test_open_commit_is_restored_finished() {
    let source = Arc::new(MemoryCluster::new());
    common::create_repo(&source, "R").await;
    let mut open = common::commit("R", "c1", None);
    open.finished = None;
    source.build_commit(open).await.unwrap();
    let target = Arc::new(MemoryCluster::new());

    stream_round_trip(&source, &target).await;
    let restored = target.inspect_commit(&Commit::new("R", "c1")).await.unwrap();
    assert!(restored.finished.is_some());
}

/// A missing dump is a store error, not a panic or a silent no-op.
#[tokio::test]
async fn test_missing_dump_fails() {
    let target = Arc::new(MemoryCluster::new());
    let (_, stores) = mem_stores();
    let err = server(&target, stores)
        .restore_from(
            &CallContext::new(),
            [RestoreRequest::Url("mem://backups/absent.dump".into())],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

/// A block larger than one record is split on extract and reassembled on
/// restore under the same record limit.
#[tokio::test]
async fn test_block_over_the_record_limit() {
    let source = Arc::new(MemoryCluster::new());
    let payload: Vec<u8> = (0..4000u32).map(|i| (i * 7 % 251) as u8).collect();
    let object = source.store_object(payload.clone()).unwrap();
    let target = Arc::new(MemoryCluster::new());
    let (_, stores) = mem_stores();
    let config = AdminConfig {
        limits: LimitsConfig {
            max_record_bytes: 4096,
        },
        ..AdminConfig::default()
    };

    let request = ExtractRequest::all().with_url("mem://b/d");
    AdminServer::new(ClusterClient::from_shared(source.clone()), config.clone())
        .with_object_stores(stores.clone())
        .extract_to_vec(&CallContext::new(), &request)
        .await
        .unwrap();
    let applied = AdminServer::new(ClusterClient::from_shared(target.clone()), config)
        .with_object_stores(stores)
        .restore_from(&CallContext::new(), [RestoreRequest::Url("mem://b/d".into())])
        .await
        .unwrap();
    assert!(applied > 2);

    let block = target.get_block(&Block::new(object.hash.clone())).await.unwrap();
    assert_eq!(block.as_ref(), payload.as_slice());
}
