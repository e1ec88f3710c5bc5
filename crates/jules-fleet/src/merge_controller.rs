//! Sequential merge loop: select PRs, update branch, wait for CI,
//! squash-merge, conflict re-dispatch. A multi-step remote git operation
//! loop with explicit failure classification per step, driven entirely
//! through the `RepoHost` capability trait.

use std::time::Duration;

use async_trait::async_trait;
use jules_client::error::Error;
use jules_client::Result;
use tracing::{info, warn};

use crate::repo_host::{CiConclusion, FleetMode, MergeResult, PullRequest, RepoHost, UpdateBranchResult};

const BETWEEN_STEPS_DELAY: Duration = Duration::from_secs(5);
const CI_POLL_INTERVAL: Duration = Duration::from_secs(5);
const REDISPATCH_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub mode: FleetMode,
    pub run_id: Option<String>,
    pub base_branch: String,
    pub admin: bool,
    pub max_ci_wait_seconds: u64,
    pub max_retries: u32,
    pub poll_timeout_seconds: u64,
    pub owner: String,
    pub repo: String,
    pub re_dispatch: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            mode: FleetMode::Label,
            run_id: None,
            base_branch: "main".to_string(),
            admin: false,
            max_ci_wait_seconds: 600,
            max_retries: 2,
            poll_timeout_seconds: 900,
            owner: String::new(),
            repo: String::new(),
            re_dispatch: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeRunResult {
    pub merged: Vec<u64>,
    pub skipped: Vec<u64>,
    pub redispatched: Vec<(u64, u64)>,
}

/// Returned when `run` aborts partway through a fleet: carries every PR
/// merged, skipped, or redispatched before the failure, alongside the error
/// that ended the run, so a caller can observe progress instead of losing it
/// to the `Err` path.
#[derive(Debug)]
pub struct MergeRunError {
    pub result: MergeRunResult,
    pub source: Error,
}

impl std::fmt::Display for MergeRunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "merge run aborted after merging {:?} (skipped {:?}): {}",
            self.result.merged, self.result.skipped, self.source
        )
    }
}

impl std::error::Error for MergeRunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Result type for `MergeController::run`, distinct from `jules_client::Result`
/// because an aborted run still needs to surface the work it completed.
pub type RunResult = std::result::Result<MergeRunResult, MergeRunError>;

/// Seeds a replacement session for a PR whose branch has an unresolvable
/// conflict, then locates the PR it produces.
#[async_trait]
pub trait SessionDispatcher: Send + Sync {
    async fn redispatch(&self, original: &PullRequest) -> Result<String>;
}

pub struct MergeController<H: RepoHost, D: SessionDispatcher> {
    host: H,
    dispatcher: D,
}

impl<H: RepoHost, D: SessionDispatcher> MergeController<H, D> {
    pub fn new(host: H, dispatcher: D) -> Self {
        Self { host, dispatcher }
    }

    pub async fn run(&self, options: &MergeOptions) -> RunResult {
        let mut prs = self
            .host
            .list_prs(options.mode, options.run_id.as_deref(), &options.base_branch)
            .await
            .map_err(|source| MergeRunError {
                result: MergeRunResult::default(),
                source,
            })?;
        prs.sort_by_key(|pr| pr.number);

        let mut result = MergeRunResult::default();

        for (position, mut pr) in prs.into_iter().enumerate() {
            let mut retries = 0u32;
            loop {
                if position > 0 || retries > 0 {
                    let update = self.host.update_branch(&pr).await.map_err(|source| MergeRunError {
                        result: result.clone(),
                        source,
                    })?;
                    match update {
                        UpdateBranchResult::Error => {
                            return Err(MergeRunError {
                                result,
                                source: Error::GithubApiError {
                                    message: format!("updateBranch failed for PR #{}", pr.number),
                                },
                            });
                        }
                        UpdateBranchResult::Conflict => {
                            if !options.re_dispatch || retries >= options.max_retries {
                                return Err(MergeRunError {
                                    result,
                                    source: Error::ConflictRetriesExhausted {
                                        pr_number: pr.number,
                                        pr_url: pr.url.clone(),
                                    },
                                });
                            }
                            let new_number = self
                                .redispatch(&pr, options.poll_timeout_seconds)
                                .await
                                .map_err(|source| MergeRunError {
                                    result: result.clone(),
                                    source,
                                })?;
                            result.redispatched.push((pr.number, new_number.number));
                            pr = new_number;
                            retries += 1;
                            continue;
                        }
                        UpdateBranchResult::Ok => {
                            tokio::time::sleep(BETWEEN_STEPS_DELAY).await;
                        }
                    }
                }

                let ci = self
                    .wait_for_ci(&pr, options.max_ci_wait_seconds)
                    .await
                    .map_err(|source| MergeRunError {
                        result: result.clone(),
                        source,
                    })?;
                match ci {
                    CiConclusion::Fail | CiConclusion::Timeout => {
                        warn!(pr = pr.number, "CI did not pass, skipping PR");
                        result.skipped.push(pr.number);
                        break;
                    }
                    CiConclusion::Pass | CiConclusion::None => {}
                }

                let merge = self.host.squash_merge(&pr).await.map_err(|source| MergeRunError {
                    result: result.clone(),
                    source,
                })?;
                match merge {
                    MergeResult::Error => {
                        return Err(MergeRunError {
                            result,
                            source: Error::MergeFailed {
                                pr_number: pr.number,
                                message: "squashMerge returned an error".to_string(),
                            },
                        });
                    }
                    MergeResult::Ok => {
                        info!(pr = pr.number, "merged");
                        result.merged.push(pr.number);
                        break;
                    }
                }
            }
            tokio::time::sleep(BETWEEN_STEPS_DELAY).await;
        }

        Ok(result)
    }

    async fn wait_for_ci(&self, pr: &PullRequest, max_wait_seconds: u64) -> Result<CiConclusion> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(max_wait_seconds);
        loop {
            let runs = self.host.check_runs(&pr.head_sha).await?;
            if runs.is_empty() {
                return Ok(CiConclusion::None);
            }
            let all_complete = runs.iter().all(|r| r.conclusion.is_some());
            if all_complete {
                let any_failed = runs.iter().any(|r| {
                    matches!(
                        r.conclusion.as_deref(),
                        Some("failure") | Some("timed_out") | Some("cancelled")
                    )
                });
                return Ok(if any_failed { CiConclusion::Fail } else { CiConclusion::Pass });
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(CiConclusion::Timeout);
            }
            tokio::time::sleep(CI_POLL_INTERVAL).await;
        }
    }

    async fn redispatch(&self, original: &PullRequest, poll_timeout_seconds: u64) -> Result<PullRequest> {
        let session_id = self.dispatcher.redispatch(original).await?;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(poll_timeout_seconds);
        loop {
            let prs = self
                .host
                .list_prs(FleetMode::FleetRun, Some(&session_id), "")
                .await?;
            if let Some(pr) = prs.into_iter().find(|pr| pr.session_id.as_deref() == Some(&session_id)) {
                return Ok(pr);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::RedispatchTimeout { session_id });
            }
            tokio::time::sleep(REDISPATCH_POLL_INTERVAL).await;
        }
    }
}
