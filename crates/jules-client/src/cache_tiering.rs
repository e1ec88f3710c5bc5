//! Iceberg tiering: frozen (>30d old) / warm (terminal + verified <24h) /
//! hot (everything else, requires network). A single pure predicate mediates
//! every cache-backed read in the Session Engine.

use chrono::{DateTime, Utc};

use crate::model::{CachedSession, SessionState};

const FROZEN_AFTER: chrono::Duration = chrono::Duration::days(30);
const WARM_WINDOW: chrono::Duration = chrono::Duration::hours(24);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Frozen,
    Warm,
    Hot,
}

pub fn tier(cached: &CachedSession, now: DateTime<Utc>) -> Tier {
    if now - cached.resource.create_time > FROZEN_AFTER {
        return Tier::Frozen;
    }
    let terminal = matches!(
        cached.resource.state,
        SessionState::Completed | SessionState::Failed
    );
    if terminal && now - cached.last_synced_at < WARM_WINDOW {
        return Tier::Warm;
    }
    Tier::Hot
}

/// `true` iff a read for this session may be served entirely from the local
/// cache without contacting the network.
pub fn is_cache_valid(cached: Option<&CachedSession>, now: DateTime<Utc>) -> bool {
    match cached {
        None => false,
        Some(cached) => !matches!(tier(cached, now), Tier::Hot),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AutomationMode, Session};
    use chrono::Duration;

    fn session_at(create_time: DateTime<Utc>, state: SessionState) -> CachedSession {
        CachedSession {
            resource: Session {
                id: "s1".into(),
                create_time,
                update_time: create_time,
                state,
                prompt: "p".into(),
                title: None,
                source_context: None,
                automation_mode: AutomationMode::Unspecified,
                outputs: vec![],
                url: None,
            },
            last_synced_at: create_time,
        }
    }

    #[test]
    fn none_is_never_valid() {
        assert!(!is_cache_valid(None, Utc::now()));
    }

    #[test]
    fn old_session_is_frozen_and_valid() {
        let now = Utc::now();
        let cached = session_at(now - Duration::days(31), SessionState::InProgress);
        assert_eq!(tier(&cached, now), Tier::Frozen);
        assert!(is_cache_valid(Some(&cached), now));
    }

    #[test]
    fn terminal_recently_synced_is_warm_and_valid() {
        let now = Utc::now();
        let mut cached = session_at(now - Duration::days(1), SessionState::Completed);
        cached.last_synced_at = now - Duration::hours(1);
        assert_eq!(tier(&cached, now), Tier::Warm);
        assert!(is_cache_valid(Some(&cached), now));
    }

    #[test]
    fn in_progress_recent_session_is_hot_and_invalid() {
        let now = Utc::now();
        let cached = session_at(now - Duration::hours(1), SessionState::InProgress);
        assert_eq!(tier(&cached, now), Tier::Hot);
        assert!(!is_cache_valid(Some(&cached), now));
    }

    #[test]
    fn terminal_but_stale_sync_is_hot() {
        let now = Utc::now();
        let mut cached = session_at(now - Duration::days(2), SessionState::Failed);
        cached.last_synced_at = now - Duration::hours(25);
        assert_eq!(tier(&cached, now), Tier::Hot);
    }
}
