//! Cold history + hot updates + merged stream, all keyed by one session id.
//! History reads from the append-only log; updates poll the remote log tail
//! and diff it against the last-seen offset.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::model::Activity;
use crate::platform::Platform;
use crate::store::ActivityLogStore;
use crate::transport::{Method, Transport};

const FROZEN_AFTER: chrono::Duration = chrono::Duration::days(30);

#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub type_filter: Option<String>,
    pub after_id: Option<String>,
    pub before_id: Option<String>,
    pub limit: Option<usize>,
}

pub struct ActivityClient {
    session_id: String,
    session_create_time: DateTime<Utc>,
    transport: Arc<dyn Transport>,
    log: Arc<ActivityLogStore>,
    platform: Arc<dyn Platform>,
    config: ClientConfig,
}

impl ActivityClient {
    pub fn new(
        session_id: String,
        session_create_time: DateTime<Utc>,
        transport: Arc<dyn Transport>,
        log: Arc<ActivityLogStore>,
        platform: Arc<dyn Platform>,
        config: ClientConfig,
    ) -> Self {
        Self {
            session_id,
            session_create_time,
            transport,
            log,
            platform,
            config,
        }
    }

    fn is_frozen(&self) -> bool {
        Utc::now() - self.session_create_time > FROZEN_AFTER
    }

    async fn high_water_mark(&self) -> Result<Option<(DateTime<Utc>, String)>> {
        Ok(self
            .log
            .latest()
            .await?
            .map(|a| (a.create_time, a.id)))
    }

    async fn fetch_page(&self, page_token: Option<&str>) -> Result<(Vec<Activity>, Option<String>)> {
        let mut query = vec![("pageSize".to_string(), "100".to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken".to_string(), token.to_string()));
        }
        let query_refs: Vec<(&str, String)> =
            query.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        let path = format!("sessions/{}/activities", self.session_id);
        let value = self
            .transport
            .request(Method::Get, &path, &query_refs, None, &|| false)
            .await?;
        parse_activities_page(&value)
    }

    /// Fills the local log with anything newer than the local HWM, then
    /// yields the whole local log in append order. Each call is fresh.
    pub async fn history(&self) -> Result<Vec<Activity>> {
        self.hydrate().await?;
        self.log.scan().await
    }

    /// Pulls any new activities into the local log. No-op for frozen
    /// sessions. Returns the count of newly appended activities.
    pub async fn hydrate(&self) -> Result<usize> {
        if self.is_frozen() {
            tracing::debug!(session_id = %self.session_id, "session frozen, skipping hydrate");
            return Ok(0);
        }
        let hwm = self.high_water_mark().await?;

        let Some((hwm_time, hwm_id)) = hwm else {
            // No local history: pull the full log, oldest-appendable order.
            let mut appended = 0usize;
            let mut page_token = None;
            let mut all = Vec::new();
            loop {
                let (page, next) = self.fetch_page(page_token.as_deref()).await?;
                all.extend(page);
                match next {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
            // Server pages are newest-first; append oldest-first so the log
            // reads in natural chronological order.
            all.reverse();
            for activity in all {
                self.log.append(&activity).await?;
                appended += 1;
            }
            return Ok(appended);
        };

        let mut appended = 0usize;
        let mut page_token = None;
        'pages: loop {
            let (page, next) = self.fetch_page(page_token.as_deref()).await?;
            let mut to_append = Vec::new();
            let mut page_fully_at_or_before_hwm = true;
            for activity in page {
                if activity.create_time > hwm_time
                    || (activity.create_time == hwm_time && activity.id != hwm_id)
                {
                    page_fully_at_or_before_hwm = false;
                    to_append.push(activity);
                }
            }
            // Pages arrive newest-first; reverse so appends land in
            // chronological order within this page.
            to_append.reverse();
            for activity in to_append {
                self.log.append(&activity).await?;
                appended += 1;
            }
            if page_fully_at_or_before_hwm {
                break 'pages;
            }
            match next {
                Some(token) => page_token = Some(token),
                None => break 'pages,
            }
        }
        Ok(appended)
    }

    /// Infinite poll-and-filter loop; the caller stops iteration (drops the
    /// stream) to cancel. Every yielded activity is persisted before being
    /// handed to the caller.
    pub fn updates(self: Arc<Self>) -> impl Stream<Item = Result<Activity>> {
        struct State {
            client: Arc<ActivityClient>,
            hwm: Option<(DateTime<Utc>, String)>,
            pending: Vec<Activity>,
        }

        let initial = State {
            client: self,
            hwm: None,
            pending: Vec::new(),
        };

        stream::unfold(initial, move |mut state| async move {
            loop {
                if let Some(activity) = state.pending.pop() {
                    return Some((Ok(activity), state));
                }
                if state.hwm.is_none() {
                    match state.client.high_water_mark().await {
                        Ok(hwm) => state.hwm = hwm,
                        Err(e) => return Some((Err(e), state)),
                    }
                }
                state
                    .client
                    .platform
                    .sleep(state.client.config.polling_interval())
                    .await;
                let page = state.client.fetch_page(None).await;
                let (mut page, _) = match page {
                    Ok(p) => p,
                    Err(e) => return Some((Err(e), state)),
                };
                page.sort_by(|a, b| a.create_time.cmp(&b.create_time));
                let mut fresh = Vec::new();
                for activity in page {
                    let is_new = match &state.hwm {
                        None => true,
                        Some((t, id)) => activity.create_time > *t
                            || (activity.create_time == *t && activity.id != *id),
                    };
                    if is_new {
                        state.hwm = Some((activity.create_time, activity.id.clone()));
                        if let Err(e) = state.client.log.append(&activity).await {
                            return Some((Err(e), state));
                        }
                        fresh.push(activity);
                    }
                }
                if !fresh.is_empty() {
                    fresh.reverse();
                    state.pending = fresh;
                }
            }
        })
    }

    /// `history()` followed by `updates()`, with `updates()` filtered
    /// against the HWM established by history so the tail isn't re-yielded.
    pub fn stream(self: Arc<Self>) -> impl Stream<Item = Result<Activity>> {
        let client = self.clone();
        stream::once(async move { client.history().await })
            .flat_map(|history| match history {
                Ok(activities) => stream::iter(activities.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::iter(vec![Err(e)]).right_stream(),
            })
            .chain(self.updates())
    }

    /// The activity with the newest `create_time` in the local log, if any.
    pub async fn latest(&self) -> Result<Option<Activity>> {
        self.log.latest().await
    }

    pub async fn select(&self, opts: &SelectOptions) -> Result<Vec<Activity>> {
        let all = self.log.scan().await?;
        let mut seen_after = opts.after_id.is_none();
        let mut out = Vec::new();
        for activity in all {
            if let Some(after) = &opts.after_id {
                if !seen_after {
                    if activity.id == *after {
                        seen_after = true;
                    }
                    continue;
                }
            }
            if let Some(before) = &opts.before_id {
                if activity.id == *before {
                    break;
                }
            }
            if let Some(type_filter) = &opts.type_filter {
                if activity.payload.type_name() != type_filter {
                    continue;
                }
            }
            out.push(activity);
            if let Some(limit) = opts.limit {
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

fn parse_activities_page(value: &Value) -> Result<(Vec<Activity>, Option<String>)> {
    let activities = value
        .get("activities")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::with_capacity(activities.len());
    for raw in activities {
        match serde_json::from_value::<Activity>(raw) {
            Ok(activity) => out.push(activity),
            Err(e) => tracing::warn!(error = %e, "skipping malformed activity from server"),
        }
    }
    let next = value
        .get("nextPageToken")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok((out, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivityPayload, Originator};
    use crate::platform::FakePlatform;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn activity(id: &str, secs: i64) -> Activity {
        Activity {
            id: id.to_string(),
            create_time: Utc::now() + chrono::Duration::seconds(secs),
            originator: Originator::Agent,
            artifacts: vec![],
            payload: ActivityPayload::AgentMessaged {
                message: "hi".into(),
            },
        }
    }

    struct PagedTransport {
        pages: Vec<Value>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for PagedTransport {
        async fn request(
            &self,
            _method: Method,
            _path: &str,
            _query: &[(&str, String)],
            _body: Option<Value>,
            _cancelled: &(dyn Fn() -> bool + Sync),
        ) -> Result<Value> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages.get(i).cloned().unwrap_or(serde_json::json!({"activities":[]})))
        }
    }

    fn client_with(
        transport: PagedTransport,
        platform: Arc<FakePlatform>,
    ) -> Arc<ActivityClient> {
        let log = Arc::new(ActivityLogStore::new(
            PathBuf::from("/cache/s1/activities.jsonl"),
            PathBuf::from("/cache/s1/metadata.json"),
            platform.clone(),
        ));
        Arc::new(ActivityClient::new(
            "s1".into(),
            Utc::now() - chrono::Duration::hours(1),
            Arc::new(transport),
            log,
            platform,
            ClientConfig {
                polling_interval_ms: 0,
                ..ClientConfig::default()
            },
        ))
    }

    #[tokio::test]
    async fn hydrate_from_empty_pulls_full_log_in_order() {
        let a1 = serde_json::to_value(activity("a1", 0)).unwrap();
        let a2 = serde_json::to_value(activity("a2", 1)).unwrap();
        let transport = PagedTransport {
            pages: vec![serde_json::json!({"activities": [a2, a1]})],
            calls: AtomicUsize::new(0),
        };
        let platform = Arc::new(FakePlatform::new());
        let client = client_with(transport, platform);

        let appended = client.hydrate().await.unwrap();
        assert_eq!(appended, 2);
        let history = client.history().await.unwrap();
        assert_eq!(history.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(), vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn select_filters_by_type_and_cursor() {
        let platform = Arc::new(FakePlatform::new());
        let transport = PagedTransport {
            pages: vec![],
            calls: AtomicUsize::new(0),
        };
        let client = client_with(transport, platform);
        client.log.append(&activity("a1", 0)).await.unwrap();
        let mut a2 = activity("a2", 1);
        a2.payload = ActivityPayload::UserMessaged { message: "hey".into() };
        client.log.append(&a2).await.unwrap();

        let result = client
            .select(&SelectOptions {
                type_filter: Some("userMessaged".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "a2");
    }
}
