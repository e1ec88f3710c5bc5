//! Immutable point-in-time aggregate over a session: activities, timeline,
//! insights, and two serializers (`toJSON`/`toMarkdown`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::Result;
use crate::model::{Activity, ActivityPayload, Artifact, GitPatch, Output, Session};
use crate::query::summarize;
use crate::session_engine::SessionEngine;
use crate::unidiff::{parse_unidiff, FileChange};

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub time: DateTime<Utc>,
    pub type_name: &'static str,
    pub summary: String,
}

#[derive(Debug, Clone, Default)]
pub struct Insights {
    pub session_completed_count: usize,
    pub plan_generated_count: usize,
    pub user_messaged_count: usize,
    pub failed_command_activity_ids: Vec<String>,
}

pub struct Snapshot {
    pub session_id: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub prompt: String,
    pub title: Option<String>,
    pub pull_request: Option<Output>,
    pub outputs: Vec<Output>,
    pub activities: Vec<Activity>,
    pub activity_counts: HashMap<&'static str, usize>,
    pub timeline: Vec<TimelineEntry>,
    pub insights: Insights,
}

impl Snapshot {
    /// Builds a snapshot from `info()` and the full activity history, run
    /// concurrently since neither depends on the other.
    pub async fn build(engine: &SessionEngine, session_id: &str) -> Result<Self> {
        let (session, activities) = tokio::try_join!(
            engine.info(session_id),
            fetch_history(engine, session_id),
        )?;
        Ok(Self::from_parts(session, activities))
    }

    fn from_parts(session: Session, activities: Vec<Activity>) -> Self {
        let duration_ms = (session.update_time - session.create_time)
            .num_milliseconds()
            .max(0);

        let mut activity_counts: HashMap<&'static str, usize> = HashMap::new();
        let mut timeline = Vec::with_capacity(activities.len());
        let mut insights = Insights::default();

        for activity in &activities {
            let type_name = activity.payload.type_name();
            *activity_counts.entry(type_name).or_insert(0) += 1;
            timeline.push(TimelineEntry {
                time: activity.create_time,
                type_name,
                summary: summarize(activity),
            });

            match &activity.payload {
                ActivityPayload::SessionCompleted {} => insights.session_completed_count += 1,
                ActivityPayload::PlanGenerated { .. } => insights.plan_generated_count += 1,
                ActivityPayload::UserMessaged { .. } => insights.user_messaged_count += 1,
                _ => {}
            }
            let has_failed_command = activity.artifacts.iter().any(|a| {
                matches!(a, Artifact::BashOutput { exit_code: Some(code), .. } if *code != 0)
            });
            if has_failed_command {
                insights.failed_command_activity_ids.push(activity.id.clone());
            }
        }

        Self {
            session_id: session.id.clone(),
            url: session.url.clone(),
            created_at: session.create_time,
            updated_at: session.update_time,
            duration_ms,
            prompt: session.prompt.clone(),
            title: session.title.clone(),
            pull_request: session.pull_request().cloned(),
            outputs: session.outputs.clone(),
            activities,
            activity_counts,
            timeline,
            insights,
        }
    }

    /// First `changeSet` output's parsed file changes, if any.
    pub fn generated_files(&self) -> Vec<FileChange> {
        self.change_set().map(parse_unidiff).unwrap_or_default()
    }

    /// First `changeSet` output's raw unidiff patch, if any. Reads from the
    /// session's outputs (the same source `Outcome::change_set` reads), not
    /// activity artifacts, so this agrees with `Outcome` even when a session
    /// never duplicated its terminal patch as an activity artifact.
    pub fn change_set(&self) -> Option<&str> {
        self.outputs.iter().find_map(|o| match o {
            Output::ChangeSet { git_patch, .. } => Some(git_patch.unidiff_patch.as_str()),
            _ => None,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.session_id,
            "url": self.url,
            "createdAt": self.created_at.to_rfc3339(),
            "updatedAt": self.updated_at.to_rfc3339(),
            "durationMs": self.duration_ms,
            "prompt": self.prompt,
            "title": self.title,
            "pullRequest": self.pull_request,
            "activityCounts": self.activity_counts,
            "timeline": self.timeline.iter().map(|t| json!({
                "time": t.time.to_rfc3339(),
                "type": t.type_name,
                "summary": t.summary,
            })).collect::<Vec<_>>(),
            "insights": {
                "sessionCompletedCount": self.insights.session_completed_count,
                "planGeneratedCount": self.insights.plan_generated_count,
                "userMessagedCount": self.insights.user_messaged_count,
                "failedCommandCount": self.insights.failed_command_activity_ids.len(),
            },
        })
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Session {}\n\n", self.session_id));

        out.push_str("## Overview\n\n");
        out.push_str(&format!("- Prompt: {}\n", self.prompt));
        if let Some(title) = &self.title {
            out.push_str(&format!("- Title: {title}\n"));
        }
        out.push_str(&format!("- Created: {}\n", self.created_at.to_rfc3339()));
        out.push_str(&format!("- Updated: {}\n", self.updated_at.to_rfc3339()));
        out.push_str(&format!("- Duration: {}ms\n", self.duration_ms));
        if let Some(url) = &self.url {
            out.push_str(&format!("- URL: {url}\n"));
        }
        out.push('\n');

        out.push_str("## Insights\n\n");
        out.push_str(&format!(
            "- sessionCompleted: {}\n",
            self.insights.session_completed_count
        ));
        out.push_str(&format!(
            "- planGenerated: {}\n",
            self.insights.plan_generated_count
        ));
        out.push_str(&format!(
            "- userMessaged: {}\n",
            self.insights.user_messaged_count
        ));
        out.push_str(&format!(
            "- failedCommandCount: {}\n\n",
            self.insights.failed_command_activity_ids.len()
        ));

        out.push_str("## Timeline\n\n");
        for entry in &self.timeline {
            out.push_str(&format!(
                "- {} [{}] {}\n",
                entry.time.to_rfc3339(),
                entry.type_name,
                entry.summary
            ));
        }
        out.push('\n');

        out.push_str("## Counts\n\n");
        let mut counts: Vec<(&&str, &usize)> = self.activity_counts.iter().collect();
        counts.sort_by_key(|(k, _)| **k);
        for (type_name, count) in counts {
            out.push_str(&format!("- {type_name}: {count}\n"));
        }

        out
    }
}

async fn fetch_history(engine: &SessionEngine, session_id: &str) -> Result<Vec<Activity>> {
    let session = engine.info(session_id).await?;
    let client = engine.activity_client(session_id, session.create_time);
    client.history().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AutomationMode, Originator, SessionState};

    fn session(id: &str) -> Session {
        Session {
            id: id.to_string(),
            create_time: Utc::now() - chrono::Duration::minutes(10),
            update_time: Utc::now(),
            state: SessionState::Completed,
            prompt: "do it".into(),
            title: Some("Title".into()),
            source_context: None,
            automation_mode: AutomationMode::AutoCreatePr,
            outputs: vec![],
            url: None,
        }
    }

    fn activity(id: &str, payload: ActivityPayload, artifacts: Vec<Artifact>) -> Activity {
        Activity {
            id: id.to_string(),
            create_time: Utc::now(),
            originator: Originator::Agent,
            artifacts,
            payload,
        }
    }

    #[test]
    fn insights_count_failed_bash_commands() {
        let activities = vec![
            activity(
                "a1",
                ActivityPayload::ProgressUpdated {
                    title: Some("Running tests".into()),
                    description: None,
                },
                vec![Artifact::BashOutput {
                    command: "cargo test".into(),
                    stdout: "".into(),
                    stderr: "".into(),
                    exit_code: Some(1),
                }],
            ),
            activity("a2", ActivityPayload::SessionCompleted {}, vec![]),
        ];
        let snapshot = Snapshot::from_parts(session("s1"), activities);
        assert_eq!(snapshot.insights.failed_command_activity_ids, vec!["a1".to_string()]);
        assert_eq!(snapshot.insights.session_completed_count, 1);
    }

    #[test]
    fn timeline_summaries_match_per_type_rules() {
        let activities = vec![activity(
            "a1",
            ActivityPayload::UserMessaged {
                message: "x".repeat(150),
            },
            vec![],
        )];
        let snapshot = Snapshot::from_parts(session("s1"), activities);
        assert!(snapshot.timeline[0].summary.starts_with("User: "));
        assert!(snapshot.timeline[0].summary.ends_with("..."));
    }

    #[test]
    fn change_set_reads_session_outputs_not_activity_artifacts() {
        let mut session = session("s1");
        session.outputs = vec![Output::ChangeSet {
            source: None,
            git_patch: GitPatch {
                unidiff_patch: "diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n+x\n".into(),
                base_commit_id: "deadbeef".into(),
                suggested_commit_message: None,
            },
        }];
        // No activity ever carried a `changeSet` artifact for this session.
        let snapshot = Snapshot::from_parts(session, vec![]);
        assert_eq!(
            snapshot.change_set(),
            Some("diff --git a/f b/f\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n+x\n")
        );
        assert_eq!(snapshot.generated_files().len(), 1);
    }

    #[test]
    fn to_markdown_has_stable_section_order() {
        let snapshot = Snapshot::from_parts(session("s1"), vec![]);
        let md = snapshot.to_markdown();
        let overview = md.find("## Overview").unwrap();
        let insights = md.find("## Insights").unwrap();
        let timeline = md.find("## Timeline").unwrap();
        let counts = md.find("## Counts").unwrap();
        assert!(overview < insights && insights < timeline && timeline < counts);
    }
}
