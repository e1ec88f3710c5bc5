//! Error taxonomy for the Jules client.
//!
//! Every error carries a kind, a human message, and (where useful) an
//! actionable suggestion, per the propagation policy in the protocol spec:
//! recoverable errors are retried by the layer that can retry them (see
//! `transport::retry`); everything else surfaces to the caller unchanged.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No API key was available at transport construction time.
    #[error("missing credential: no Jules API key configured")]
    MissingCredential,

    /// Transport-level failure: connect, TLS, aborted, or timed out.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// 401/403 from the server.
    #[error("auth failure: request rejected by the server (check your API key)")]
    AuthFailure,

    /// 429 after the retry budget was exhausted.
    #[error("rate limited: retry budget exhausted after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Any other non-2xx response.
    #[error("server error: HTTP {status}")]
    ServerError { status: u16 },

    /// 404 on a resource the caller specified.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// A session ended in `failed` state while mapping to an `Outcome`.
    #[error("session failed{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    SessionFailed { reason: Option<String> },

    /// A second `sync()` was attempted while one was already in progress.
    #[error("sync already in progress")]
    SyncInProgress,

    /// The server rejected an operation as illegal in the session's current state.
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// A caller-provided deadline elapsed.
    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    /// A caller-provided cancellation signal fired.
    #[error("cancelled")]
    Cancelled,

    /// The session reached a terminal state before `ask()` saw an agent reply.
    #[error("session ended before the agent replied")]
    EarlyTermination,

    /// Fleet merge: conflict retries were exhausted without a clean merge.
    #[error("conflict retries exhausted for PR #{pr_number} (see {pr_url})")]
    ConflictRetriesExhausted { pr_number: u64, pr_url: String },

    /// Fleet merge: re-dispatch did not produce a new PR before the deadline.
    #[error("timed out waiting for a re-dispatched PR for session {session_id}")]
    RedispatchTimeout { session_id: String },

    /// Fleet merge: the merge call itself failed.
    #[error("merge failed for PR #{pr_number}: {message}")]
    MergeFailed { pr_number: u64, message: String },

    /// Fleet merge: the RepoHost reported a hard failure (not a conflict).
    #[error("github api error: {message}")]
    GithubApiError { message: String },

    /// Local persistence layer I/O failure.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local JSON (de)serialization failure.
    #[error("malformed JSON at {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Query Engine request failed validation (see `query::validate`).
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },
}

impl Error {
    /// Whether a higher layer may reasonably retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NetworkFailure(_) | Error::RateLimited { .. } | Error::ServerError { .. }
        )
    }

    /// A human-actionable suggestion, when one applies. `None` for errors
    /// that are self-explanatory or purely informational (e.g. `Cancelled`).
    pub fn actionable(&self) -> Option<&'static str> {
        match self {
            Error::MissingCredential => {
                Some("set the Jules API key (JULES_API_KEY or ClientConfig::api_key)")
            }
            Error::AuthFailure => Some("check that your API key is valid and not revoked"),
            Error::RateLimited { .. } => {
                Some("the server is rate limiting this client; wait longer between requests")
            }
            Error::ConflictRetriesExhausted { .. } => {
                Some("resolve the conflict manually or re-run with re-dispatch enabled")
            }
            Error::SyncInProgress => Some("await the in-flight sync() before starting another"),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Json {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_rate_limit_are_retryable() {
        assert!(Error::NetworkFailure("boom".into()).is_retryable());
        assert!(Error::RateLimited { attempts: 5 }.is_retryable());
        assert!(Error::ServerError { status: 503 }.is_retryable());
        assert!(!Error::AuthFailure.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn session_failed_formats_reason_when_present() {
        let with_reason = Error::SessionFailed {
            reason: Some("build broke".into()),
        };
        assert_eq!(with_reason.to_string(), "session failed: build broke");

        let without_reason = Error::SessionFailed { reason: None };
        assert_eq!(without_reason.to_string(), "session failed");
    }

    #[test]
    fn actionable_hints_present_for_known_kinds() {
        assert!(Error::MissingCredential.actionable().is_some());
        assert!(Error::EarlyTermination.actionable().is_none());
    }
}
