//! Fleet orchestration reuses the client's error taxonomy directly — merge
//! and dispatch failures are already first-class `jules_client::Error`
//! variants (`ConflictRetriesExhausted`, `RedispatchTimeout`, `MergeFailed`,
//! `GithubApiError`), so no separate error type is introduced here.

pub use jules_client::error::Error;
pub use jules_client::Result;
