mod client;
mod retry;

pub use client::{request_with_not_found_retry, HttpTransport, Method, Transport};
pub use retry::{backoff_delay, RetryBudget};
