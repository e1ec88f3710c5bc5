use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::platform::Platform;

use super::retry::RetryBudget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single HTTP call, backed by `reqwest` in production. One instance is
/// constructed per `SessionEngine`/`ActivityClient` and shared thereafter.
///
/// `cancelled` is polled between backoff sleep slices on a 429 response, so a
/// caller can abort an in-flight rate-limit retry loop rather than wait out
/// the full budget. Pass `&|| false` when no external cancellation source is
/// available.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<Value>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
    platform: std::sync::Arc<dyn Platform>,
}

impl HttpTransport {
    pub fn new(config: ClientConfig, platform: std::sync::Arc<dyn Platform>) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(Error::MissingCredential);
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::NetworkFailure(e.to_string()))?;
        Ok(Self {
            client,
            config,
            platform,
        })
    }

    async fn attempt(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: &Option<Value>,
    ) -> std::result::Result<Value, AttemptError> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        builder = builder.header("X-Goog-Api-Key", api_key).query(query);
        if let Some(body) = body {
            builder = builder.json(body);
        } else if method == Method::Post {
            builder = builder.json(&serde_json::json!({}));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AttemptError::Fatal(Error::NetworkFailure(format!("timed out: {e}")))
            } else {
                AttemptError::Fatal(Error::NetworkFailure(e.to_string()))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| AttemptError::Fatal(Error::NetworkFailure(e.to_string())))?;
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes)
                .map_err(|e| AttemptError::Fatal(Error::json("response body", e)));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AttemptError::Fatal(Error::AuthFailure));
        }
        if status.as_u16() == 429 {
            return Err(AttemptError::RateLimited);
        }
        if status.as_u16() == 404 {
            return Err(AttemptError::NotFound(path.to_string()));
        }
        Err(AttemptError::Fatal(Error::ServerError {
            status: status.as_u16(),
        }))
    }
}

enum AttemptError {
    RateLimited,
    NotFound(String),
    Fatal(Error),
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        cancelled: &(dyn Fn() -> bool + Sync),
    ) -> Result<Value> {
        let budget = RetryBudget {
            base_delay: Duration::from_millis(self.config.base_delay_ms),
            max_delay: Duration::from_millis(self.config.max_delay_ms),
            max_total: Duration::from_millis(self.config.max_retry_time_ms),
        };
        let start = Instant::now();
        let mut attempt_no = 0u32;
        loop {
            if cancelled() {
                return Err(Error::Cancelled);
            }
            match self.attempt(method, path, query, &body).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::NotFound(resource)) => {
                    return Err(Error::NotFound { resource })
                }
                Err(AttemptError::RateLimited) => {
                    tracing::warn!(attempt = attempt_no, path, "rate limited, backing off");
                    let elapsed = start.elapsed();
                    let proceeded = budget
                        .wait(self.platform.as_ref(), attempt_no, elapsed, cancelled)
                        .await;
                    if !proceeded {
                        if cancelled() {
                            return Err(Error::Cancelled);
                        }
                        return Err(Error::RateLimited {
                            attempts: attempt_no + 1,
                        });
                    }
                    attempt_no += 1;
                }
            }
        }
    }
}

/// Eventual-consistency helper for reads immediately following a create:
/// retries on 404 only, up to `max_retries`, with its own backoff series
/// independent of the rate-limit retry loop above.
pub async fn request_with_not_found_retry(
    transport: &dyn Transport,
    platform: &dyn Platform,
    config: &ClientConfig,
    path: &str,
) -> Result<Value> {
    let mut attempt = 0u32;
    loop {
        match transport.request(Method::Get, path, &[], None, &|| false).await {
            Ok(value) => return Ok(value),
            Err(Error::NotFound { resource }) if attempt < config.not_found_max_retries => {
                let delay = super::retry::backoff_delay(
                    Duration::from_millis(config.not_found_initial_delay_ms),
                    Duration::from_millis(config.max_delay_ms),
                    attempt,
                );
                tracing::debug!(resource, attempt, "404 on fresh resource, retrying");
                platform.sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FakePlatform;

    struct FlakyTransport {
        calls: std::sync::atomic::AtomicU32,
        fail_until: u32,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn request(
            &self,
            _method: Method,
            path: &str,
            _query: &[(&str, String)],
            _body: Option<Value>,
            _cancelled: &(dyn Fn() -> bool + Sync),
        ) -> Result<Value> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n < self.fail_until {
                return Err(Error::NotFound {
                    resource: path.to_string(),
                });
            }
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn not_found_retry_succeeds_once_resource_appears() {
        let platform = FakePlatform::new();
        let transport = FlakyTransport {
            calls: Default::default(),
            fail_until: 2,
        };
        let config = ClientConfig {
            not_found_max_retries: 5,
            not_found_initial_delay_ms: 1,
            max_delay_ms: 10,
            ..ClientConfig::default()
        };
        let result =
            request_with_not_found_retry(&transport, &platform, &config, "sessions/abc").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn not_found_retry_gives_up_after_budget() {
        let platform = FakePlatform::new();
        let transport = FlakyTransport {
            calls: Default::default(),
            fail_until: 100,
        };
        let config = ClientConfig {
            not_found_max_retries: 2,
            not_found_initial_delay_ms: 1,
            max_delay_ms: 10,
            ..ClientConfig::default()
        };
        let result =
            request_with_not_found_retry(&transport, &platform, &config, "sessions/abc").await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }
}
