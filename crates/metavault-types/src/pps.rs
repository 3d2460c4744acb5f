//! Pipeline and job facts.
//!
//! A pipeline's [`Input`] is a tree: leaves name repositories (or cron
//! ticks), interior nodes combine their children. Pipelines whose input
//! references another pipeline's output repository form the provenance
//! graph that restore must respect.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pfs::Commit;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
}

impl Pipeline {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
}

impl Job {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

// ---------------------------------------------------------------------------
// Input tree
// ---------------------------------------------------------------------------

/// Repository leaf of an input tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PfsInput {
    #[serde(default)]
    pub name: String,
    pub repo: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub glob: String,
}

/// Time-triggered leaf of an input tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronInput {
    pub name: String,
    pub spec: String,
}

/// Pipeline input specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Pfs(PfsInput),
    Cron(CronInput),
    Cross(Vec<Input>),
    Union(Vec<Input>),
    Join(Vec<Input>),
    Group(Vec<Input>),
}

impl Input {
    /// Shorthand for a single-repository input.
    #[must_use]
    pub fn pfs(repo: impl Into<String>, glob: impl Into<String>) -> Self {
        let repo = repo.into();
        Self::Pfs(PfsInput {
            name: repo.clone(),
            repo,
            branch: "master".into(),
            glob: glob.into(),
        })
    }

    /// Child inputs of a combining node; empty for leaves.
    #[must_use]
    pub fn children(&self) -> &[Input] {
        match self {
            Self::Pfs(_) | Self::Cron(_) => &[],
            Self::Cross(inputs) | Self::Union(inputs) | Self::Join(inputs) | Self::Group(inputs) => {
                inputs.as_slice()
            }
        }
    }

    /// Visit every node of the tree, children before their parent.
    pub fn visit<F: FnMut(&Input)>(&self, f: &mut F) {
        for child in self.children() {
            child.visit(f);
        }
        f(self);
    }

    /// Repository names referenced by `pfs` leaves, in visit order.
    #[must_use]
    pub fn repos(&self) -> Vec<&str> {
        let mut repos = Vec::new();
        self.collect_repos(&mut repos);
        repos
    }

    fn collect_repos<'a>(&'a self, out: &mut Vec<&'a str>) {
        for child in self.children() {
            child.collect_repos(out);
        }
        if let Self::Pfs(pfs) = self {
            out.push(pfs.repo.as_str());
        }
    }
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub stdin: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParallelismSpec {
    pub constant: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Starting,
    Running,
    Restarting,
    Failure,
    Paused,
    Standby,
    Crashing,
}

/// Live pipeline as reported by the pipeline service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub pipeline: Pipeline,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub parallelism_spec: Option<ParallelismSpec>,
    #[serde(default)]
    pub input: Option<Input>,
    #[serde(default)]
    pub output_branch: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enable_stats: bool,
    /// Commit in the spec repo that froze this version of the pipeline.
    #[serde(default)]
    pub spec_commit: Option<Commit>,
    #[serde(default)]
    pub state: PipelineState,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl PipelineInfo {
    /// Repositories this pipeline reads from.
    #[must_use]
    pub fn input_repos(&self) -> Vec<&str> {
        self.input.as_ref().map(Input::repos).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePipelineRequest {
    pub pipeline: Pipeline,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub parallelism_spec: Option<ParallelismSpec>,
    #[serde(default)]
    pub input: Option<Input>,
    #[serde(default)]
    pub output_branch: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enable_stats: bool,
    #[serde(default)]
    pub spec_commit: Option<Commit>,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub reprocess: bool,
}

impl CreatePipelineRequest {
    /// Rebuild the creation request that would produce `info`.
    ///
    /// `spec_commit` is left unset; callers that restore a frozen spec attach
    /// it themselves.
    #[must_use]
    pub fn from_info(info: &PipelineInfo) -> Self {
        Self {
            pipeline: info.pipeline.clone(),
            transform: info.transform.clone(),
            parallelism_spec: info.parallelism_spec,
            input: info.input.clone(),
            output_branch: info.output_branch.clone(),
            description: info.description.clone(),
            enable_stats: info.enable_stats,
            spec_commit: None,
            update: false,
            reprocess: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Starting,
    Running,
    Failure,
    Success,
    Killed,
    Merging,
    Egressing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessStats {
    #[serde(default)]
    pub download_bytes: u64,
    #[serde(default)]
    pub upload_bytes: u64,
}

/// Datum counters of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatumCounts {
    #[serde(default)]
    pub processed: i64,
    #[serde(default)]
    pub skipped: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub failed: i64,
    #[serde(default)]
    pub recovered: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job: Job,
    pub pipeline: Pipeline,
    #[serde(default)]
    pub output_commit: Option<Commit>,
    #[serde(default)]
    pub stats_commit: Option<Commit>,
    #[serde(default)]
    pub restart: u64,
    #[serde(default)]
    pub data: DatumCounts,
    #[serde(default)]
    pub stats: ProcessStats,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub pipeline: Pipeline,
    #[serde(default)]
    pub output_commit: Option<Commit>,
    #[serde(default)]
    pub stats_commit: Option<Commit>,
    #[serde(default)]
    pub restart: u64,
    #[serde(default)]
    pub data: DatumCounts,
    #[serde(default)]
    pub stats: ProcessStats,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
}

impl CreateJobRequest {
    /// Snapshot of `info` attributed to `pipeline`.
    #[must_use]
    pub fn from_info(pipeline: &Pipeline, info: &JobInfo) -> Self {
        Self {
            pipeline: pipeline.clone(),
            output_commit: info.output_commit.clone(),
            stats_commit: info.stats_commit.clone(),
            restart: info.restart,
            data: info.data,
            stats: info.stats,
            state: info.state,
            reason: info.reason.clone(),
            started: info.started,
            finished: info.finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross_of_two() -> Input {
        Input::Cross(vec![
            Input::pfs("images", "/*"),
            Input::Union(vec![
                Input::pfs("labels", "/"),
                Input::Cron(CronInput {
                    name: "tick".into(),
                    spec: "@every 1m".into(),
                }),
            ]),
        ])
    }

    #[test]
    fn visit_is_post_order() {
        let mut kinds = Vec::new();
        cross_of_two().visit(&mut |input| {
            kinds.push(match input {
                Input::Pfs(p) => p.repo.clone(),
                Input::Cron(c) => c.name.clone(),
                Input::Cross(_) => "cross".into(),
                Input::Union(_) => "union".into(),
                Input::Join(_) => "join".into(),
                Input::Group(_) => "group".into(),
            });
        });
        assert_eq!(kinds, vec!["images", "labels", "tick", "union", "cross"]);
    }

    #[test]
    fn repos_skips_cron_leaves() {
        assert_eq!(cross_of_two().repos(), vec!["images", "labels"]);
    }

    #[test]
    fn input_wire_shape_is_tagged_by_kind() {
        let json = serde_json::to_value(Input::pfs("images", "/*")).unwrap();
        assert_eq!(json["pfs"]["repo"], "images");
        assert_eq!(json["pfs"]["branch"], "master");
    }

    #[test]
    fn create_request_from_info_drops_spec_commit() {
        let info = PipelineInfo {
            pipeline: Pipeline::new("edges"),
            version: 3,
            transform: Transform {
                image: "alpine".into(),
                cmd: vec!["sh".into()],
                ..Transform::default()
            },
            parallelism_spec: Some(ParallelismSpec { constant: 2 }),
            input: Some(Input::pfs("images", "/*")),
            output_branch: "master".into(),
            description: "edge detection".into(),
            enable_stats: true,
            spec_commit: Some(Commit::new("spec", "s1")),
            state: PipelineState::Running,
            created_at: None,
        };
        let req = CreatePipelineRequest::from_info(&info);
        assert_eq!(req.pipeline, info.pipeline);
        assert_eq!(req.input, info.input);
        assert_eq!(req.parallelism_spec, Some(ParallelismSpec { constant: 2 }));
        assert!(req.enable_stats);
        assert!(req.spec_commit.is_none());
        assert_eq!(info.input_repos(), vec!["images"]);
    }
}
