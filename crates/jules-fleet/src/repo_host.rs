//! `RepoHost`: the abstract git/GitHub capability the merge controller
//! consumes. Git/GitHub plumbing itself is out of scope — only the
//! operations the controller depends on are specified.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetMode {
    Label,
    FleetRun,
}

#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head_sha: String,
    pub head_branch: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateBranchResult {
    Ok,
    Conflict,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiConclusion {
    Pass,
    Fail,
    None,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct CheckRun {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    Ok,
    Error,
}

/// Consumed by the Fleet Merge Controller. Implementations own
/// authentication and the actual git/GitHub client plumbing.
#[async_trait]
pub trait RepoHost: Send + Sync {
    async fn list_prs(&self, mode: FleetMode, run_id: Option<&str>, base_branch: &str) -> jules_client::Result<Vec<PullRequest>>;

    async fn update_branch(&self, pr: &PullRequest) -> jules_client::Result<UpdateBranchResult>;

    async fn check_runs(&self, sha: &str) -> jules_client::Result<Vec<CheckRun>>;

    async fn squash_merge(&self, pr: &PullRequest) -> jules_client::Result<MergeResult>;
}
