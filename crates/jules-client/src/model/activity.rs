use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::GitPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Originator {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub steps: Vec<PlanStep>,
    pub create_time: DateTime<Utc>,
}

/// One typed event payload within an activity. Tag values mirror the wire
/// protocol's camelCase event names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityPayload {
    AgentMessaged { message: String },
    UserMessaged { message: String },
    PlanGenerated { plan: Plan },
    PlanApproved { plan_id: String },
    ProgressUpdated { title: Option<String>, description: Option<String> },
    SessionCompleted {},
    SessionFailed { reason: Option<String> },
    /// Forward-compatible catch-all for payload tags this client doesn't
    /// recognize yet; preserves the raw JSON rather than discarding it.
    #[serde(other)]
    Unknown,
}

impl ActivityPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActivityPayload::AgentMessaged { .. } => "agentMessaged",
            ActivityPayload::UserMessaged { .. } => "userMessaged",
            ActivityPayload::PlanGenerated { .. } => "planGenerated",
            ActivityPayload::PlanApproved { .. } => "planApproved",
            ActivityPayload::ProgressUpdated { .. } => "progressUpdated",
            ActivityPayload::SessionCompleted {} => "sessionCompleted",
            ActivityPayload::SessionFailed { .. } => "sessionFailed",
            ActivityPayload::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivityPayload::SessionCompleted {} | ActivityPayload::SessionFailed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Artifact {
    ChangeSet {
        source: Option<String>,
        git_patch: GitPatch,
    },
    Media {
        data: String,
        format: String,
    },
    BashOutput {
        command: String,
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
}

/// One event in a session's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub create_time: DateTime<Utc>,
    pub originator: Originator,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(flatten)]
    pub payload: ActivityPayload,
}

impl Activity {
    /// Total order used by the high-water mark: newest `create_time` wins,
    /// ties broken by id equality (same id => same event, per the log's
    /// append-only invariant).
    pub fn is_newer_than(&self, other_time: DateTime<Utc>, other_id: &str) -> bool {
        self.create_time > other_time || (self.create_time == other_time && self.id != other_id)
    }
}
