//! Session lifecycle: create, poll, approve, send, ask, waitFor, result.
//! State transitions are remote-driven: this engine never asserts a
//! transition locally, only observes one by polling and re-reading state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{json, Value};

use crate::activity_client::ActivityClient;
use crate::cache_tiering::is_cache_valid;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::model::{
    Activity, ActivityPayload, AutomationMode, CachedSession, Originator, Output, Session,
    SessionState, SourceContext,
};
use crate::paths::CacheLayout;
use crate::platform::Platform;
use crate::store::{ActivityLogStore, SessionIndexStore};
use crate::transport::{request_with_not_found_retry, Method, Transport};
use crate::unidiff::{parse_unidiff, FileChange};

#[derive(Debug, Clone, Default)]
pub struct CreateSessionConfig {
    pub prompt: String,
    pub title: Option<String>,
    pub source: Option<(String, String)>,
    pub starting_branch: Option<String>,
    pub require_plan_approval: Option<bool>,
    pub auto_pr: Option<bool>,
}

pub struct Outcome {
    pub session_id: String,
    pub title: Option<String>,
    pub pull_request: Option<Output>,
    pub outputs: Vec<Output>,
}

impl Outcome {
    pub fn generated_files(&self) -> Vec<FileChange> {
        self.change_set_patch()
            .map(|patch| parse_unidiff(patch))
            .unwrap_or_default()
    }

    pub fn change_set(&self) -> Option<&str> {
        self.change_set_patch()
    }

    fn change_set_patch(&self) -> Option<&str> {
        self.outputs.iter().find_map(|o| match o {
            Output::ChangeSet { git_patch, .. } => Some(git_patch.unidiff_patch.as_str()),
            _ => None,
        })
    }
}

pub struct SessionEngine {
    transport: Arc<dyn Transport>,
    platform: Arc<dyn Platform>,
    index_store: Arc<SessionIndexStore>,
    layout: CacheLayout,
    config: ClientConfig,
}

impl SessionEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        platform: Arc<dyn Platform>,
        index_store: Arc<SessionIndexStore>,
        layout: CacheLayout,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            platform,
            index_store,
            layout,
            config,
        }
    }

    fn activity_log(&self, session_id: &str) -> Arc<ActivityLogStore> {
        Arc::new(ActivityLogStore::new(
            self.layout.activities_log(session_id),
            self.layout.activity_metadata(session_id),
            self.platform.clone(),
        ))
    }

    pub fn index_store(&self) -> &Arc<SessionIndexStore> {
        &self.index_store
    }

    pub fn activity_client(&self, session_id: &str, create_time: DateTime<Utc>) -> Arc<ActivityClient> {
        Arc::new(ActivityClient::new(
            session_id.to_string(),
            create_time,
            self.transport.clone(),
            self.activity_log(session_id),
            self.platform.clone(),
            self.config.clone(),
        ))
    }

    pub async fn create(&self, cfg: CreateSessionConfig) -> Result<String> {
        let require_plan_approval = cfg.require_plan_approval.unwrap_or(true);
        let auto_pr = cfg.auto_pr.unwrap_or(true);

        let mut source_context = None;
        if let Some((owner, repo)) = &cfg.source {
            let path = format!("sources/github/{owner}/{repo}");
            let resolved = self
                .transport
                .request(Method::Get, &path, &[], None, &|| false)
                .await?;
            let source_name = resolved
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(&path)
                .to_string();
            source_context = Some(SourceContext {
                source: source_name,
                starting_branch: cfg.starting_branch.clone(),
            });
        }

        let mut body = json!({
            "prompt": cfg.prompt,
            "requirePlanApproval": require_plan_approval,
            "automationMode": if auto_pr { "AUTO_CREATE_PR" } else { "AUTOMATION_MODE_UNSPECIFIED" },
        });
        if let Some(title) = &cfg.title {
            body["title"] = json!(title);
        }
        if let Some(ctx) = &source_context {
            body["sourceContext"] = json!({
                "source": ctx.source,
                "githubRepoContext": { "startingBranch": ctx.starting_branch },
            });
        }

        let response = self
            .transport
            .request(Method::Post, "sessions", &[], Some(body), &|| false)
            .await?;
        let session = parse_session(&response)?;
        let id = session.id.clone();
        self.upsert(session).await?;
        Ok(id)
    }

    pub async fn info(&self, id: &str) -> Result<Session> {
        let cached = self.index_store.get(id).await?;
        let now = self.platform.now();
        if is_cache_valid(cached.as_ref(), now) {
            if let Some(cached) = cached {
                return Ok(cached.resource);
            }
        }

        let path = format!("sessions/{id}");
        match self.transport.request(Method::Get, &path, &[], None, &|| false).await {
            Ok(value) => {
                let session = parse_session(&value)?;
                self.upsert(session.clone()).await?;
                Ok(session)
            }
            Err(Error::NotFound { resource }) => {
                if cached.is_some() {
                    self.index_store.delete(id).await?;
                }
                Err(Error::NotFound { resource })
            }
            Err(e) => Err(e),
        }
    }

    /// Fresh reads immediately after `create()` may race server-side
    /// eventual consistency; this wrapper uses the 404 retry helper instead
    /// of the rate-limit retry loop.
    pub async fn info_fresh(&self, id: &str) -> Result<Session> {
        let path = format!("sessions/{id}");
        let value = request_with_not_found_retry(
            self.transport.as_ref(),
            self.platform.as_ref(),
            &self.config,
            &path,
        )
        .await?;
        let session = parse_session(&value)?;
        self.upsert(session.clone()).await?;
        Ok(session)
    }

    pub async fn approve(&self, id: &str) -> Result<()> {
        let path = format!("sessions/{id}:approvePlan");
        self.transport
            .request(Method::Post, &path, &[], Some(json!({})), &|| false)
            .await?;
        Ok(())
    }

    pub async fn send(&self, id: &str, prompt: &str) -> Result<()> {
        let path = format!("sessions/{id}:sendMessage");
        self.transport
            .request(Method::Post, &path, &[], Some(json!({ "prompt": prompt })), &|| false)
            .await?;
        Ok(())
    }

    pub async fn ask(&self, id: &str, prompt: &str) -> Result<Activity> {
        let ask_start = self.platform.now();
        let create_time = self.info(id).await?.create_time;
        self.send(id, prompt).await?;

        let client = self.activity_client(id, create_time);
        let mut updates = Box::pin(client.updates());
        while let Some(item) = updates.next().await {
            let activity = item?;
            if matches!(activity.originator, Originator::User) {
                continue;
            }
            if activity.create_time <= ask_start {
                continue;
            }
            if activity.payload.is_terminal() {
                return Err(Error::EarlyTermination);
            }
            if let ActivityPayload::AgentMessaged { .. } = &activity.payload {
                return Ok(activity);
            }
        }
        Err(Error::EarlyTermination)
    }

    pub async fn wait_for(
        &self,
        id: &str,
        target: SessionState,
        timeout: Option<Duration>,
    ) -> Result<Session> {
        let start = Instant::now();
        loop {
            let session = self.info_fresh(id).await?;
            if session.state == target || session.state.is_terminal() {
                return Ok(session);
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(Error::Timeout {
                        operation: format!("waitFor({})", target.as_str()),
                    });
                }
            }
            self.platform.sleep(self.config.polling_interval()).await;
        }
    }

    pub async fn result(&self, id: &str, timeout: Option<Duration>) -> Result<Outcome> {
        let start = Instant::now();
        let session = loop {
            let session = self.info_fresh(id).await?;
            if session.state.is_terminal() {
                break session;
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(Error::Timeout {
                        operation: "result".to_string(),
                    });
                }
            }
            self.platform.sleep(self.config.polling_interval()).await;
        };

        if session.state == SessionState::Failed {
            // The reason is not reliably attached to the session resource
            // itself; look at the terminal `sessionFailed` activity, if the
            // server recorded one. Never fabricate a reason (see the state
            // normalization notes for why this stays `Option`).
            let client = self.activity_client(id, session.create_time);
            let _ = client.hydrate().await;
            let reason = match client.latest().await.ok().flatten() {
                Some(Activity {
                    payload: ActivityPayload::SessionFailed { reason },
                    ..
                }) => reason,
                _ => None,
            };
            return Err(Error::SessionFailed { reason });
        }

        Ok(Outcome {
            session_id: session.id.clone(),
            title: session.title.clone(),
            pull_request: session.pull_request().cloned(),
            outputs: session.outputs.clone(),
        })
    }

    /// One page of `GET /sessions`, newest-first per the wire contract.
    pub async fn list_sessions_page(&self, page_token: Option<&str>) -> Result<(Vec<Session>, Option<String>)> {
        let mut query = vec![("pageSize".to_string(), "100".to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken".to_string(), token.to_string()));
        }
        let query_refs: Vec<(&str, String)> =
            query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let value = self
            .transport
            .request(Method::Get, "sessions", &query_refs, None, &|| false)
            .await?;
        let sessions = value
            .get("sessions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|s| parse_session(&s).ok())
            .collect();
        let next = value
            .get("nextPageToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok((sessions, next))
    }

    pub async fn upsert_session(&self, session: Session) -> Result<()> {
        self.upsert(session).await
    }

    async fn upsert(&self, session: Session) -> Result<()> {
        let cached = CachedSession {
            resource: session,
            last_synced_at: self.platform.now(),
        };
        self.index_store.upsert(&cached).await
    }
}

pub(crate) fn parse_session(value: &Value) -> Result<Session> {
    let id = value
        .get("id")
        .or_else(|| value.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidState {
            message: "session response missing id".to_string(),
        })?
        .to_string();
    let create_time = parse_time(value.get("createTime"))?;
    let update_time = parse_time(value.get("updateTime")).unwrap_or(create_time);
    let state = value
        .get("state")
        .and_then(Value::as_str)
        .map(SessionState::from_wire)
        .unwrap_or(SessionState::Unspecified);
    let prompt = value
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let title = value.get("title").and_then(Value::as_str).map(str::to_string);
    let automation_mode = value
        .get("automationMode")
        .and_then(Value::as_str)
        .map(AutomationMode::from_wire)
        .unwrap_or_default();
    let url = value.get("url").and_then(Value::as_str).map(str::to_string);
    let source_context = value.get("sourceContext").and_then(|sc| {
        Some(SourceContext {
            source: sc.get("source")?.as_str()?.to_string(),
            starting_branch: sc
                .get("githubRepoContext")
                .and_then(|g| g.get("startingBranch"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    });
    let outputs = value
        .get("outputs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|o| serde_json::from_value::<Output>(o).ok())
        .collect();

    Ok(Session {
        id,
        create_time,
        update_time,
        state,
        prompt,
        title,
        source_context,
        automation_mode,
        outputs,
        url,
    })
}

fn parse_time(value: Option<&Value>) -> Result<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidState {
            message: "missing or malformed timestamp".to_string(),
        })
}
