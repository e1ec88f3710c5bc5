//! Jules client SDK.
//!
//! Drives a remote code-agent REST service: sessions, their append-only
//! activity logs, a local replica cache with tiered staleness rules, an
//! incremental reconciliation pass, and a small local query engine over
//! the cached data.
//!
//! # Modules
//!
//! - [`session_engine`]: session lifecycle (create/info/approve/send/ask/
//!   waitFor/result).
//! - [`activity_client`]: per-session activity log access — cold history,
//!   hot updates, merged stream.
//! - [`sync`]: incremental cache fill with checkpointing and cancellation.
//! - [`query`]: local JQL over cached sessions and activities.
//! - [`snapshot`]: immutable point-in-time session aggregate.

#![allow(clippy::uninlined_format_args)]

pub mod activity_client;
pub mod cache_tiering;
pub mod config;
pub mod error;
pub mod model;
pub mod paths;
pub mod platform;
pub mod query;
pub mod session_engine;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod transport;
pub mod unidiff;

pub use activity_client::{ActivityClient, SelectOptions};
pub use cache_tiering::{is_cache_valid, tier, Tier};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use model::{
    Activity, ActivityPayload, Artifact, AutomationMode, CachedSession, Originator, Output,
    Session, SessionIndexEntry, SessionState, SyncCheckpoint,
};
pub use paths::CacheLayout;
pub use platform::{Platform, RealPlatform};
pub use query::{FilterOp, Order, QueryRequest, QuerySource, WhereClause};
pub use session_engine::{CreateSessionConfig, Outcome, SessionEngine};
pub use snapshot::Snapshot;
pub use store::{ActivityLogStore, SessionIndexStore};
pub use sync::{ReconciliationEngine, SyncDepth, SyncOptions, SyncPhase, SyncProgress, SyncStats};
pub use transport::{HttpTransport, Method, Transport};
pub use unidiff::{parse_unidiff, ChangeType, FileChange};
