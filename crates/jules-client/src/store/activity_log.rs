//! Append-only per-session activity log with an in-memory offset index.
//! The index is built by scanning the log once on open and kept current on
//! every append, so random access by id never re-scans the file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::model::Activity;
use crate::platform::Platform;

/// Bounded-size chunk used by `latest()` to scan from the end of the file
/// without loading the whole log into memory.
const TAIL_CHUNK_BYTES: u64 = 4096;

struct IndexState {
    /// `None` until the first `ensure_index` scan completes.
    offsets: Option<HashMap<String, u64>>,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct ActivityMetadata {
    #[serde(rename = "activityCount")]
    activity_count: u64,
}

pub struct ActivityLogStore {
    path: PathBuf,
    metadata_path: PathBuf,
    platform: Arc<dyn Platform>,
    index: RwLock<IndexState>,
    /// Coalesces concurrent index builds: the second caller awaits this
    /// lock instead of re-scanning the file.
    build_lock: Mutex<()>,
    /// Serializes the bump-then-append sequence in `append()`.
    append_lock: Mutex<()>,
}

impl ActivityLogStore {
    pub fn new(path: PathBuf, metadata_path: PathBuf, platform: Arc<dyn Platform>) -> Self {
        Self {
            path,
            metadata_path,
            platform,
            index: RwLock::new(IndexState { offsets: None }),
            build_lock: Mutex::new(()),
            append_lock: Mutex::new(()),
        }
    }

    /// The log is the source of truth; `metadata.json`'s count is a lazily
    /// reconciled cache that may briefly disagree with the index across a
    /// crash boundary (the bump and the append are not transactional).
    pub async fn activity_count(&self) -> Result<u64> {
        match self.platform.read_file(&self.metadata_path).await? {
            Some(bytes) => {
                let meta: ActivityMetadata = serde_json::from_slice(&bytes)
                    .unwrap_or_default();
                Ok(meta.activity_count)
            }
            None => Ok(0),
        }
    }

    /// Counts decodable lines in the log and rewrites `metadata.json` to
    /// match, resolving any disagreement left by an interrupted append.
    pub async fn reconcile_activity_count(&self) -> Result<u64> {
        let count = self.scan().await?.len() as u64;
        self.write_activity_count(count).await?;
        Ok(count)
    }

    async fn write_activity_count(&self, count: u64) -> Result<()> {
        let bytes = serde_json::to_vec(&ActivityMetadata {
            activity_count: count,
        })
        .expect("ActivityMetadata is always serializable");
        self.platform
            .write_file_atomic(&self.metadata_path, &bytes)
            .await
    }

    /// Idempotent: positions the append cursor at EOF. No-op beyond that —
    /// the index is built lazily on first access.
    pub async fn init(&self) -> Result<()> {
        self.platform.file_len(&self.path).await?;
        Ok(())
    }

    pub async fn append(&self, activity: &Activity) -> Result<()> {
        let mut line = serde_json::to_vec(activity)
            .map_err(|e| Error::json(format!("activity {}", activity.id), e))?;
        line.push(b'\n');

        // The count is bumped before the append completes so a reader that
        // observes `activityCount = N` can trust at least N records will
        // eventually be readable, even though the two writes aren't
        // transactional across a crash.
        let _guard = self.append_lock.lock().await;
        let current = self.activity_count().await?;
        self.write_activity_count(current + 1).await?;
        let offset = self.platform.append_file(&self.path, &line).await?;

        // Optimistic update: if the index is already built, extend it in
        // place rather than invalidating and forcing a rescan.
        let mut index_guard = self.index.write().await;
        if let Some(map) = index_guard.offsets.as_mut() {
            map.insert(activity.id.clone(), offset);
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Activity>> {
        self.ensure_index().await?;
        let offset = {
            let guard = self.index.read().await;
            guard.offsets.as_ref().and_then(|m| m.get(id).copied())
        };
        let Some(offset) = offset else {
            return Ok(None);
        };
        let Some(total_len) = self.platform.file_len(&self.path).await? else {
            return Ok(None);
        };
        let bytes = self
            .platform
            .read_at(&self.path, offset, total_len - offset)
            .await?;
        let line = match bytes.iter().position(|&b| b == b'\n') {
            Some(pos) => &bytes[..pos],
            None => &bytes[..],
        };
        match serde_json::from_slice::<Activity>(line) {
            Ok(activity) => Ok(Some(activity)),
            Err(_) => Ok(None),
        }
    }

    /// Scans from the end in bounded chunks, growing the window until a
    /// decodable trailing line is found. Corrupt trailing lines are skipped
    /// with a warning, not treated as fatal.
    pub async fn latest(&self) -> Result<Option<Activity>> {
        let Some(total_len) = self.platform.file_len(&self.path).await? else {
            return Ok(None);
        };
        if total_len == 0 {
            return Ok(None);
        }
        let mut window = TAIL_CHUNK_BYTES.min(total_len);
        loop {
            let start = total_len - window;
            let bytes = self.platform.read_at(&self.path, start, window).await?;
            let text = String::from_utf8_lossy(&bytes);
            let mut lines: Vec<&str> = text.split('\n').filter(|l| !l.is_empty()).collect();
            // A window that doesn't start at byte 0 may begin mid-line; that
            // leading fragment will simply fail to decode below and be
            // skipped, same as any other corrupt line.
            if start > 0 && !lines.is_empty() {
                lines.remove(0);
            }
            for candidate in lines.iter().rev() {
                match serde_json::from_str::<Activity>(candidate) {
                    Ok(activity) => return Ok(Some(activity)),
                    Err(_) => {
                        tracing::warn!("skipping corrupt line while scanning for latest()");
                        continue;
                    }
                }
            }
            if start == 0 {
                return Ok(None);
            }
            window = (window * 2).min(total_len);
        }
    }

    pub async fn scan(&self) -> Result<Vec<Activity>> {
        let Some(bytes) = self.platform.read_file(&self.path).await? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for line in bytes.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Activity>(line) {
                Ok(activity) => out.push(activity),
                Err(_) => tracing::warn!("skipping malformed activity log line"),
            }
        }
        Ok(out)
    }

    pub async fn close(&self) {
        *self.index.write().await = IndexState { offsets: None };
    }

    pub async fn contains_id(&self, id: &str) -> Result<bool> {
        self.ensure_index().await?;
        Ok(self.index.read().await.offsets.as_ref().is_some_and(|m| m.contains_key(id)))
    }

    async fn ensure_index(&self) -> Result<()> {
        if self.index.read().await.offsets.is_some() {
            return Ok(());
        }
        let _guard = self.build_lock.lock().await;
        // Double-check: another caller may have finished building while we
        // waited for the build lock.
        if self.index.read().await.offsets.is_some() {
            return Ok(());
        }
        let Some(bytes) = self.platform.read_file(&self.path).await? else {
            self.index.write().await.offsets = Some(HashMap::new());
            return Ok(());
        };
        let mut map = HashMap::new();
        let mut offset = 0u64;
        for line in bytes.split(|&b| b == b'\n') {
            if line.is_empty() {
                offset += 1;
                continue;
            }
            if let Ok(activity) = serde_json::from_slice::<Activity>(line) {
                map.insert(activity.id, offset);
            }
            offset += line.len() as u64 + 1;
        }
        self.index.write().await.offsets = Some(map);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivityPayload, Originator};
    use crate::platform::FakePlatform;
    use chrono::{Duration as ChronoDuration, Utc};

    fn activity(id: &str, offset_secs: i64) -> Activity {
        Activity {
            id: id.to_string(),
            create_time: Utc::now() + ChronoDuration::seconds(offset_secs),
            originator: Originator::Agent,
            artifacts: vec![],
            payload: ActivityPayload::AgentMessaged {
                message: format!("msg-{id}"),
            },
        }
    }

    #[tokio::test]
    async fn append_then_get_round_trips() {
        let platform = Arc::new(FakePlatform::new());
        let store = ActivityLogStore::new(
            PathBuf::from("/cache/s1/activities.jsonl"),
            PathBuf::from("/cache/s1/metadata.json"),
            platform,
        );
        store.init().await.unwrap();
        store.append(&activity("a1", 0)).await.unwrap();
        store.append(&activity("a2", 1)).await.unwrap();

        let fetched = store.get("a2").await.unwrap().unwrap();
        assert_eq!(fetched.id, "a2");
    }

    #[tokio::test]
    async fn append_then_scan_contains_appended() {
        let platform = Arc::new(FakePlatform::new());
        let store = ActivityLogStore::new(
            PathBuf::from("/cache/s1/activities.jsonl"),
            PathBuf::from("/cache/s1/metadata.json"),
            platform,
        );
        store.append(&activity("a1", 0)).await.unwrap();
        let scanned = store.scan().await.unwrap();
        assert!(scanned.iter().any(|a| a.id == "a1"));
    }

    #[tokio::test]
    async fn latest_returns_newest_by_create_time() {
        let platform = Arc::new(FakePlatform::new());
        let store = ActivityLogStore::new(
            PathBuf::from("/cache/s1/activities.jsonl"),
            PathBuf::from("/cache/s1/metadata.json"),
            platform,
        );
        store.append(&activity("a1", 0)).await.unwrap();
        store.append(&activity("a2", 100)).await.unwrap();
        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.id, "a2");
    }

    #[tokio::test]
    async fn concurrent_get_calls_coalesce_index_build() {
        let platform = Arc::new(FakePlatform::new());
        let store = Arc::new(ActivityLogStore::new(
            PathBuf::from("/cache/s1/activities.jsonl"),
            PathBuf::from("/cache/s1/metadata.json"),
            platform,
        ));
        store.append(&activity("a1", 0)).await.unwrap();

        let s1 = store.clone();
        let s2 = store.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { s1.get("a1").await }),
            tokio::spawn(async move { s2.get("a1").await }),
        );
        assert!(r1.unwrap().unwrap().is_some());
        assert!(r2.unwrap().unwrap().is_some());
    }

    #[tokio::test]
    async fn activity_count_tracks_appends() {
        let platform = Arc::new(FakePlatform::new());
        let store = ActivityLogStore::new(
            PathBuf::from("/cache/s1/activities.jsonl"),
            PathBuf::from("/cache/s1/metadata.json"),
            platform,
        );
        assert_eq!(store.activity_count().await.unwrap(), 0);
        store.append(&activity("a1", 0)).await.unwrap();
        store.append(&activity("a2", 1)).await.unwrap();
        assert_eq!(store.activity_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reconcile_fixes_count_after_disagreement() {
        let platform = Arc::new(FakePlatform::new());
        let store = ActivityLogStore::new(
            PathBuf::from("/cache/s1/activities.jsonl"),
            PathBuf::from("/cache/s1/metadata.json"),
            platform,
        );
        store.append(&activity("a1", 0)).await.unwrap();
        store.write_activity_count(99).await.unwrap();
        assert_eq!(store.reconcile_activity_count().await.unwrap(), 1);
        assert_eq!(store.activity_count().await.unwrap(), 1);
    }
}
