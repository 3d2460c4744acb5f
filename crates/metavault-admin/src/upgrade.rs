//! Bring operations of older schema versions up to the current one.
//!
//! Restore handlers only know the current kinds. Each supported older
//! version maps onto them here, one step per version.

use metavault_types::op::BuildCommitRequestV1_11;
use metavault_types::pfs::{BuildCommitRequest, Commit, OriginKind};
use metavault_types::{Op, OpV1_11, OpV1_12};

/// The current-version equivalent of `op`.
#[must_use]
pub fn upgrade(op: Op) -> OpV1_12 {
    match op {
        Op::V1_12(op) => op,
        Op::V1_11(op) => upgrade_1_11(op),
    }
}

fn upgrade_1_11(op: OpV1_11) -> OpV1_12 {
    match op {
        OpV1_11::CreateBlock(req) => OpV1_12::CreateBlock(req),
        OpV1_11::CreateObject(req) => OpV1_12::CreateObject(req),
        OpV1_11::TagObject(req) => OpV1_12::TagObject(req),
        OpV1_11::CreateRepo(req) => OpV1_12::CreateRepo(req),
        OpV1_11::BuildCommit(req) => OpV1_12::BuildCommit(build_commit_1_11(req)),
        OpV1_11::CreateBranch(req) => OpV1_12::CreateBranch(req),
        OpV1_11::CreatePipeline(req) => OpV1_12::CreatePipeline(req),
        OpV1_11::CreateJob(req) => OpV1_12::CreateJob(req),
        OpV1_11::ActivateEnterprise(req) => OpV1_12::ActivateEnterprise(req),
        OpV1_11::ActivateAuth(req) => OpV1_12::ActivateAuth(req),
        OpV1_11::SetClusterRoleBinding(req) => OpV1_12::SetClusterRoleBinding(req),
        OpV1_11::SetAcl(req) => OpV1_12::SetAcl(req),
    }
}

/// 1.11 commits have an optional parent and at most one tree.
fn build_commit_1_11(req: BuildCommitRequestV1_11) -> BuildCommitRequest {
    let parent = req.parent.unwrap_or_else(|| Commit::root_of(&req.repo));
    BuildCommitRequest {
        parent,
        id: req.id,
        origin: OriginKind::User,
        trees: req.tree.into_iter().collect(),
        datums: None,
        size_bytes: req.size_bytes,
        provenance: req.provenance,
        started: req.started,
        finished: req.finished,
    }
}
