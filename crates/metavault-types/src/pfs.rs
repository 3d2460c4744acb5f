//! Versioned-filesystem facts: repositories, commits, branches, and the
//! content-addressed blocks, objects and tags that back them.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default name of the internal repository that stores frozen pipeline specs.
pub const SPEC_REPO: &str = "spec";

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Repo {
    pub name: String,
}

impl Repo {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Commit reference: a repository plus a commit ID.
///
/// An empty `id` is the explicit "no parent" marker used for root commits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commit {
    pub repo: Repo,
    pub id: String,
}

impl Commit {
    #[must_use]
    pub fn new(repo: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            repo: Repo::new(repo),
            id: id.into(),
        }
    }

    /// The empty-ID parent reference for a root commit in `repo`.
    #[must_use]
    pub fn root_of(repo: &Repo) -> Self {
        Self {
            repo: repo.clone(),
            id: String::new(),
        }
    }

    /// Whether this reference is the empty-ID root marker.
    #[must_use]
    pub fn is_root_marker(&self) -> bool {
        self.id.is_empty()
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.id)
    }
}

/// Branch reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Branch {
    pub repo: Repo,
    pub name: String,
}

impl Branch {
    #[must_use]
    pub fn new(repo: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            repo: Repo::new(repo),
            name: name.into(),
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.name)
    }
}

/// One provenance edge of a commit: the upstream commit and the branch it
/// was reached through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitProvenance {
    pub commit: Commit,
    pub branch: Branch,
}

/// How a commit came to exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// Created by a user.
    #[default]
    User,
    /// Created automatically by provenance propagation.
    Auto,
    /// Created by a consistency repair.
    Fsck,
}

/// Content-addressed object reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Object {
    pub hash: String,
}

impl Object {
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

/// Content-addressed block reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
}

impl Block {
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

/// Half-open byte range `[lower, upper)` within a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub lower: u64,
    pub upper: u64,
}

/// Location of an object's bytes inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub block: Block,
    pub range: ByteRange,
}

/// Named alias for an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

// ---------------------------------------------------------------------------
// Infos (as returned by list/inspect calls)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub repo: Repo,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size_bytes: u64,
}

impl RepoInfo {
    /// A bare fact carrying only the repository name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            repo: Repo::new(name),
            description: String::new(),
            created: None,
            size_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub commit: Commit,
    #[serde(default)]
    pub origin: OriginKind,
    /// `None` for a root commit as reported by the filesystem.
    #[serde(default)]
    pub parent_commit: Option<Commit>,
    #[serde(default)]
    pub provenance: Vec<CommitProvenance>,
    #[serde(default)]
    pub trees: Vec<Object>,
    #[serde(default)]
    pub datums: Option<Object>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    /// `None` while the commit is still open.
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub branch: Branch,
    #[serde(default)]
    pub head: Option<Commit>,
    #[serde(default)]
    pub direct_provenance: Vec<Branch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub object: Object,
    pub block_ref: BlockRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub tag: Tag,
    pub object: Object,
}

// ---------------------------------------------------------------------------
// Mutation requests (operation payloads)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRepoRequest {
    pub repo: Repo,
    #[serde(default)]
    pub description: String,
}

/// Recreate a finished commit with a fixed identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommitRequest {
    /// Always populated; root commits use [`Commit::root_of`].
    pub parent: Commit,
    pub id: String,
    #[serde(default)]
    pub origin: OriginKind,
    #[serde(default)]
    pub trees: Vec<Object>,
    #[serde(default)]
    pub datums: Option<Object>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub provenance: Vec<CommitProvenance>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
}

impl BuildCommitRequest {
    /// The commit this request creates.
    #[must_use]
    pub fn commit(&self) -> Commit {
        Commit {
            repo: self.parent.repo.clone(),
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBranchRequest {
    pub branch: Branch,
    #[serde(default)]
    pub head: Option<Commit>,
    #[serde(default)]
    pub provenance: Vec<Branch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateObjectRequest {
    pub object: Object,
    pub block_ref: BlockRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagObjectRequest {
    pub object: Object,
    pub tags: Vec<Tag>,
}

/// Raw bytes of one block. `data` is base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutBlockRequest {
    pub block: Block,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
