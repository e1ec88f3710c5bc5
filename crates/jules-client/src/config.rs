//! Environment-driven configuration, in the style of
//! `crates/swarm-agents/src/config.rs::SwarmConfig::default()`: every field
//! has a sane default and an optional env-var override.

use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://jules.googleapis.com/v1alpha";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retry_time_ms: u64,
    pub not_found_max_retries: u32,
    pub not_found_initial_delay_ms: u64,
    pub polling_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let env = |key: &str| std::env::var(key).ok();
        let env_u64 = |key: &str, fallback: u64| {
            env(key)
                .and_then(|s| s.parse().ok())
                .unwrap_or(fallback)
        };
        let env_u32 = |key: &str, fallback: u32| {
            env(key)
                .and_then(|s| s.parse().ok())
                .unwrap_or(fallback)
        };

        Self {
            base_url: env("JULES_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: env("JULES_API_KEY"),
            request_timeout_ms: env_u64("JULES_REQUEST_TIMEOUT_MS", 30_000),
            base_delay_ms: env_u64("JULES_RETRY_BASE_DELAY_MS", 1_000),
            max_delay_ms: env_u64("JULES_RETRY_MAX_DELAY_MS", 30_000),
            max_retry_time_ms: env_u64("JULES_RETRY_MAX_TOTAL_MS", 300_000),
            not_found_max_retries: env_u32("JULES_NOT_FOUND_MAX_RETRIES", 5),
            not_found_initial_delay_ms: env_u64("JULES_NOT_FOUND_INITIAL_DELAY_MS", 1_000),
            polling_interval_ms: env_u64("JULES_POLLING_INTERVAL_MS", 5_000),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

/// Probes whether `dir` can actually be written to by creating and removing
/// a throwaway file in it, rather than trusting existence/permission bits
/// alone (which miss read-only bind mounts, ACLs, etc.).
fn is_writable_dir(dir: &std::path::Path) -> bool {
    let probe = dir.join(format!(".jules-write-probe-{}", std::process::id()));
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

/// Root directory resolution for persisted cache state: `JULES_HOME` (if
/// writable), then the current working directory (if it already holds a
/// `.jules` marker and is writable), then `HOME`, then a platform temp
/// directory.
pub fn resolve_cache_root() -> std::path::PathBuf {
    use std::path::PathBuf;

    if let Ok(home) = std::env::var("JULES_HOME") {
        let path = PathBuf::from(home);
        if is_writable_dir(&path) {
            return path;
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        if cwd.join(".jules").is_dir() && is_writable_dir(&cwd) {
            return cwd;
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home);
    }
    if let Ok(tmp) = std::env::var("TMPDIR").or_else(|_| std::env::var("TMP")) {
        return PathBuf::from(tmp);
    }
    std::env::temp_dir()
}
