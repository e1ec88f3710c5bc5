//! Wire/data model: Session, Activity, Artifact, Output and their
//! tagged-variant serde encodings, mirroring `events::types::EnsembleEvent`
//! in shape (externally tagged enums keyed by a `type` field).

mod activity;
mod cache;
mod session;

pub use activity::{Activity, ActivityPayload, Artifact, Originator};
pub use cache::{CachedSession, SessionIndexEntry, SyncCheckpoint};
pub use session::{AutomationMode, Output, Session, SessionState};
