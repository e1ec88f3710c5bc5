//! Layout of the `.jules/cache` tree under the resolved root directory.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(".jules").join("cache")
    }

    pub fn sessions_index(&self) -> PathBuf {
        self.cache_dir().join("sessions.jsonl")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.cache_dir().join(session_id)
    }

    pub fn session_json(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("session.json")
    }

    pub fn activities_log(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("activities.jsonl")
    }

    pub fn activity_metadata(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("metadata.json")
    }

    pub fn sync_checkpoint(&self) -> PathBuf {
        self.cache_dir().join("sync-checkpoint.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_nests_under_jules_cache() {
        let layout = CacheLayout::new(PathBuf::from("/home/u"));
        assert_eq!(
            layout.activities_log("s1"),
            PathBuf::from("/home/u/.jules/cache/s1/activities.jsonl")
        );
        assert_eq!(
            layout.sync_checkpoint(),
            PathBuf::from("/home/u/.jules/cache/sync-checkpoint.json")
        );
    }
}
