//! Fleet orchestration on top of the Jules client SDK: parallel session
//! dispatch, file-overlap clustering, and a sequential PR merge controller
//! with CI gating and bounded conflict re-dispatch.

#![allow(clippy::uninlined_format_args)]

pub mod dispatch;
pub mod error;
pub mod merge_controller;
pub mod overlap;
pub mod repo_host;

pub use dispatch::{dispatch, DispatchOptions, DispatchOutcome};
pub use error::{Error, Result};
pub use merge_controller::{MergeController, MergeOptions, MergeRunError, MergeRunResult, RunResult, SessionDispatcher};
pub use overlap::{cluster_overlaps, Cluster, IssueFiles, OverlapReport};
pub use repo_host::{CheckRun, CiConclusion, FleetMode, MergeResult, PullRequest, RepoHost, UpdateBranchResult};
