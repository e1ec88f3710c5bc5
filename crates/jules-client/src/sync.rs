//! Reconciliation Engine: incremental cache fill against the remote
//! authoritative log. Mutual exclusion via a scoped guard that releases on
//! every exit path, including early return and panic unwind.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::model::SyncCheckpoint;
use crate::platform::Platform;
use crate::session_engine::SessionEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDepth {
    Metadata,
    Activities,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub session_id: Option<String>,
    pub limit: usize,
    pub depth: SyncDepth,
    pub incremental: bool,
    pub concurrency: usize,
    pub checkpoint: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            limit: 100,
            depth: SyncDepth::Metadata,
            incremental: true,
            concurrency: 3,
            checkpoint: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SyncPhase {
    FetchingList,
    HydratingRecords,
}

#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub current: usize,
    pub total: Option<usize>,
    pub last_ingested_id: Option<String>,
    pub activity_count: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub sessions_ingested: usize,
    pub activities_ingested: usize,
    pub is_complete: bool,
    pub duration_ms: u64,
}

/// Releases the process-wide sync flag on every exit path, including a
/// panic unwind, so a crashed sync never wedges future calls.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ReconciliationEngine {
    engine: Arc<SessionEngine>,
    platform: Arc<dyn Platform>,
    checkpoint_path: PathBuf,
    syncing: AtomicBool,
}

impl ReconciliationEngine {
    pub fn new(engine: Arc<SessionEngine>, platform: Arc<dyn Platform>, checkpoint_path: PathBuf) -> Self {
        Self {
            engine,
            platform,
            checkpoint_path,
            syncing: AtomicBool::new(false),
        }
    }

    pub async fn sync(
        &self,
        options: SyncOptions,
        on_progress: Option<&(dyn Fn(SyncProgress) + Sync)>,
        cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<SyncStats> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Err(Error::SyncInProgress);
        }
        let _guard = SyncGuard(&self.syncing);
        let start = Instant::now();

        if let Some(session_id) = &options.session_id {
            return self.sync_targeted(session_id, start).await;
        }
        self.sync_full(options, on_progress, cancelled, start).await
    }

    async fn sync_targeted(&self, session_id: &str, start: Instant) -> Result<SyncStats> {
        let result = self.engine.info_fresh(session_id).await;
        match result {
            Ok(_) => Ok(SyncStats {
                sessions_ingested: 1,
                activities_ingested: 0,
                is_complete: true,
                duration_ms: start.elapsed().as_millis() as u64,
            }),
            Err(e) => Err(e),
        }
    }

    async fn sync_full(
        &self,
        options: SyncOptions,
        on_progress: Option<&(dyn Fn(SyncProgress) + Sync)>,
        cancelled: &(dyn Fn() -> bool + Sync),
        start: Instant,
    ) -> Result<SyncStats> {
        let checkpoint = if options.checkpoint {
            self.read_checkpoint().await?
        } else {
            None
        };
        let (resume_from_id, starting_count) = match &checkpoint {
            Some(ckpt) => (Some(ckpt.last_processed_session_id.clone()), ckpt.sessions_processed as usize),
            None => (None, 0),
        };
        let mut resuming = resume_from_id.is_some();

        let hwm = if options.incremental {
            self.local_hwm().await?
        } else {
            None
        };

        let mut candidates: Vec<(String, DateTime<Utc>)> = Vec::new();
        let mut sessions_ingested = 0usize;
        let mut page_token = None;
        let mut was_aborted = false;

        'outer: loop {
            if cancelled() {
                was_aborted = true;
                break;
            }
            let (page, next) = self.engine.list_sessions_page(page_token.as_deref()).await?;
            if page.is_empty() {
                break;
            }
            for session in page {
                if cancelled() {
                    was_aborted = true;
                    break 'outer;
                }
                if resuming {
                    if resume_from_id.as_deref() == Some(session.id.as_str()) {
                        resuming = false;
                    }
                    continue;
                }
                if let Some(hwm_time) = hwm {
                    if session.create_time <= hwm_time {
                        if matches!(options.depth, SyncDepth::Activities) {
                            candidates.push((session.id.clone(), session.create_time));
                        }
                        break 'outer;
                    }
                }

                self.engine.upsert_session(session.clone()).await?;
                candidates.push((session.id.clone(), session.create_time));
                sessions_ingested += 1;

                if options.checkpoint {
                    self.write_checkpoint(&SyncCheckpoint {
                        last_processed_session_id: session.id.clone(),
                        sessions_processed: (starting_count + sessions_ingested) as u64,
                        started_at: checkpoint
                            .as_ref()
                            .map(|c| c.started_at)
                            .unwrap_or_else(|| self.platform.now()),
                    })
                    .await?;
                }

                if let Some(on_progress) = on_progress {
                    on_progress(SyncProgress {
                        phase: SyncPhase::FetchingList,
                        current: sessions_ingested,
                        total: None,
                        last_ingested_id: Some(session.id.clone()),
                        activity_count: None,
                    });
                }

                if candidates.len() >= options.limit {
                    break 'outer;
                }
            }
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let mut activities_ingested = 0usize;
        if matches!(options.depth, SyncDepth::Activities) && !was_aborted {
            let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
            let mut tasks = FuturesUnordered::new();
            for (id, create_time) in candidates.iter().cloned() {
                if cancelled() {
                    was_aborted = true;
                    break;
                }
                let engine = self.engine.clone();
                let semaphore = semaphore.clone();
                tasks.push(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                    let client = engine.activity_client(&id, create_time);
                    client.hydrate().await
                });
            }
            let total = tasks.len();
            let mut current = 0usize;
            while let Some(result) = tasks.next().await {
                current += 1;
                if let Ok(count) = result {
                    activities_ingested += count;
                }
                if let Some(on_progress) = on_progress {
                    on_progress(SyncProgress {
                        phase: SyncPhase::HydratingRecords,
                        current,
                        total: Some(total),
                        last_ingested_id: None,
                        activity_count: Some(activities_ingested),
                    });
                }
            }
        }

        if !was_aborted && options.checkpoint {
            self.clear_checkpoint().await?;
        }

        Ok(SyncStats {
            sessions_ingested,
            activities_ingested,
            is_complete: !was_aborted,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn local_hwm(&self) -> Result<Option<DateTime<Utc>>> {
        let entries = self.engine.index_store().scan_index().await?;
        Ok(entries.into_iter().map(|e| e.create_time).max())
    }

    async fn read_checkpoint(&self) -> Result<Option<SyncCheckpoint>> {
        match self.platform.read_file(&self.checkpoint_path).await {
            Ok(Some(bytes)) => Ok(serde_json::from_slice(&bytes).ok()),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    async fn write_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| Error::json("sync checkpoint", e))?;
        self.platform
            .write_file_atomic(&self.checkpoint_path, &bytes)
            .await
    }

    async fn clear_checkpoint(&self) -> Result<()> {
        self.platform.remove_file(&self.checkpoint_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::paths::CacheLayout;
    use crate::store::SessionIndexStore;
    use crate::transport::{Method, Transport};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct ListOnlyTransport {
        pages: std::sync::Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Transport for ListOnlyTransport {
        async fn request(
            &self,
            _method: Method,
            _path: &str,
            _query: &[(&str, String)],
            _body: Option<Value>,
            _cancelled: &(dyn Fn() -> bool + Sync),
        ) -> Result<Value> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(json!({"sessions": []}));
            }
            Ok(pages.remove(0))
        }
    }

    fn session_json(id: &str, create_time: &str) -> Value {
        json!({
            "id": id,
            "createTime": create_time,
            "updateTime": create_time,
            "state": "COMPLETED",
            "prompt": "p",
            "automationMode": "AUTO_CREATE_PR",
        })
    }

    fn reconciler(pages: Vec<Value>) -> ReconciliationEngine {
        let platform = Arc::new(crate::platform::FakePlatform::new());
        let index_store = Arc::new(SessionIndexStore::new(PathBuf::from("/cache"), platform.clone()));
        let layout = CacheLayout::new(PathBuf::from("/"));
        let engine = Arc::new(SessionEngine::new(
            Arc::new(ListOnlyTransport {
                pages: std::sync::Mutex::new(pages),
            }),
            platform.clone(),
            index_store,
            layout.clone(),
            ClientConfig {
                polling_interval_ms: 0,
                ..ClientConfig::default()
            },
        ));
        ReconciliationEngine::new(engine, platform, layout.sync_checkpoint())
    }

    #[tokio::test]
    async fn full_sync_ingests_all_sessions_from_empty_cache() {
        let reconciler = reconciler(vec![json!({
            "sessions": [
                session_json("s3", "2024-01-03T00:00:00Z"),
                session_json("s2", "2024-01-02T00:00:00Z"),
                session_json("s1", "2024-01-01T00:00:00Z"),
            ]
        })]);
        let stats = reconciler
            .sync(SyncOptions::default(), None, &|| false)
            .await
            .unwrap();
        assert_eq!(stats.sessions_ingested, 3);
        assert!(stats.is_complete);
    }

    #[tokio::test]
    async fn second_sync_with_no_changes_ingests_nothing() {
        let page = json!({
            "sessions": [session_json("s1", "2024-01-01T00:00:00Z")]
        });
        let reconciler = reconciler(vec![page.clone(), page]);
        reconciler.sync(SyncOptions::default(), None, &|| false).await.unwrap();
        let second = reconciler.sync(SyncOptions::default(), None, &|| false).await.unwrap();
        assert_eq!(second.sessions_ingested, 0);
        assert_eq!(second.activities_ingested, 0);
    }

    #[tokio::test]
    async fn cancellation_yields_incomplete_without_raising() {
        let reconciler = reconciler(vec![json!({
            "sessions": [session_json("s1", "2024-01-01T00:00:00Z")]
        })]);
        let stats = reconciler
            .sync(SyncOptions::default(), None, &|| true)
            .await
            .unwrap();
        assert!(!stats.is_complete);
    }

    #[tokio::test]
    async fn concurrent_sync_calls_fail_fast() {
        let reconciler = Arc::new(reconciler(vec![json!({"sessions": []})]));
        reconciler.syncing.store(true, Ordering::SeqCst);
        let err = reconciler
            .sync(SyncOptions::default(), None, &|| false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SyncInProgress));
    }
}
