use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Normalized session lifecycle state. Wire values are SCREAMING_SNAKE_CASE,
/// optionally `STATE_`-prefixed; see [`SessionState::from_wire`].
///
/// Persisted and serialized as its normalized lowerCamel string (`as_str`),
/// not as a tagged enum object — this is a scalar on the wire and in the
/// local cache alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unspecified,
    Queued,
    Planning,
    AwaitingPlanApproval,
    AwaitingUserFeedback,
    InProgress,
    Paused,
    Completed,
    Failed,
    /// Any wire value we don't recognize, lowercased verbatim, preserved for
    /// forward compatibility rather than hard-failing at the boundary.
    Unknown(String),
}

impl SessionState {
    /// Parses a wire-format state value. Accepts both `STATE_UNSPECIFIED`
    /// and `UNSPECIFIED` style prefixes (two competing tables exist in the
    /// source this protocol is distilled from; both are honored rather than
    /// silently picking one).
    pub fn from_wire(raw: &str) -> Self {
        let stripped = raw.strip_prefix("STATE_").unwrap_or(raw);
        match stripped {
            "UNSPECIFIED" | "" => SessionState::Unspecified,
            "QUEUED" => SessionState::Queued,
            "PLANNING" => SessionState::Planning,
            "AWAITING_PLAN_APPROVAL" => SessionState::AwaitingPlanApproval,
            "AWAITING_USER_FEEDBACK" => SessionState::AwaitingUserFeedback,
            "IN_PROGRESS" => SessionState::InProgress,
            "PAUSED" => SessionState::Paused,
            "COMPLETED" => SessionState::Completed,
            "FAILED" => SessionState::Failed,
            other => SessionState::Unknown(other.to_ascii_lowercase()),
        }
    }

    /// True for the two sticky terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// lowerCamel rendering, matching the normalized wire contract.
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Unspecified => "unspecified",
            SessionState::Queued => "queued",
            SessionState::Planning => "planning",
            SessionState::AwaitingPlanApproval => "awaitingPlanApproval",
            SessionState::AwaitingUserFeedback => "awaitingUserFeedback",
            SessionState::InProgress => "inProgress",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Unknown(s) => s.as_str(),
        }
    }
}

impl Serialize for SessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SessionState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "unspecified" => SessionState::Unspecified,
            "queued" => SessionState::Queued,
            "planning" => SessionState::Planning,
            "awaitingPlanApproval" => SessionState::AwaitingPlanApproval,
            "awaitingUserFeedback" => SessionState::AwaitingUserFeedback,
            "inProgress" => SessionState::InProgress,
            "paused" => SessionState::Paused,
            "completed" => SessionState::Completed,
            "failed" => SessionState::Failed,
            other => SessionState::Unknown(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AutomationMode {
    #[default]
    Unspecified,
    AutoCreatePr,
}

impl AutomationMode {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "AUTO_CREATE_PR" => AutomationMode::AutoCreatePr,
            _ => AutomationMode::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationMode::Unspecified => "unspecified",
            AutomationMode::AutoCreatePr => "autoCreatePr",
        }
    }
}

impl Serialize for AutomationMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AutomationMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "autoCreatePr" => AutomationMode::AutoCreatePr,
            _ => AutomationMode::Unspecified,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitPatch {
    pub unidiff_patch: String,
    pub base_commit_id: String,
    pub suggested_commit_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Output {
    PullRequest {
        url: String,
        title: String,
        description: Option<String>,
        base_ref: Option<String>,
        head_ref: Option<String>,
    },
    ChangeSet {
        source: Option<String>,
        git_patch: GitPatch,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContext {
    pub source: String,
    pub starting_branch: Option<String>,
}

/// A remote agent run. Mutated only by the server; the local copy is a
/// replica stamped with `last_synced_at` (see [`crate::model::CachedSession`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub state: SessionState,
    pub prompt: String,
    pub title: Option<String>,
    pub source_context: Option<SourceContext>,
    pub automation_mode: AutomationMode,
    #[serde(default)]
    pub outputs: Vec<Output>,
    pub url: Option<String>,
}

impl Session {
    /// First `pullRequest` output in encounter order, if any.
    pub fn pull_request(&self) -> Option<&Output> {
        self.outputs
            .iter()
            .find(|o| matches!(o, Output::PullRequest { .. }))
    }

    /// First `changeSet` output in encounter order, if any.
    pub fn change_set(&self) -> Option<&Output> {
        self.outputs
            .iter()
            .find(|o| matches!(o, Output::ChangeSet { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_normalization_accepts_both_prefix_styles() {
        assert_eq!(
            SessionState::from_wire("AWAITING_PLAN_APPROVAL").as_str(),
            "awaitingPlanApproval"
        );
        assert_eq!(
            SessionState::from_wire("STATE_AWAITING_PLAN_APPROVAL").as_str(),
            "awaitingPlanApproval"
        );
        assert_eq!(SessionState::from_wire("STATE_UNSPECIFIED").as_str(), "unspecified");
        assert_eq!(SessionState::from_wire("UNSPECIFIED").as_str(), "unspecified");
    }

    #[test]
    fn unknown_wire_state_lowercases_verbatim() {
        assert_eq!(SessionState::from_wire("MARS").as_str(), "mars");
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::InProgress.is_terminal());
    }
}
