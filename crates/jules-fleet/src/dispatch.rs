//! Parallel session launch with bounded concurrency, modeled on the
//! semaphore-gated `FuturesUnordered` pattern the sync engine uses for
//! activity hydration.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use jules_client::{CreateSessionConfig, Result, SessionEngine};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub concurrency: usize,
    pub stop_on_error: bool,
    pub delay_ms: u64,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            stop_on_error: true,
            delay_ms: 0,
        }
    }
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub launched: Vec<String>,
    pub failed: Vec<String>,
}

/// Launches one session per config, bounded by `options.concurrency`. With
/// `stop_on_error` (the default), the first failure cancels pending launches
/// and propagates; otherwise every config is attempted and failures are
/// collected as messages alongside the ids that did launch.
pub async fn dispatch(
    engine: Arc<SessionEngine>,
    configs: Vec<CreateSessionConfig>,
    options: &DispatchOptions,
) -> Result<DispatchOutcome> {
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = FuturesUnordered::new();

    for (i, config) in configs.into_iter().enumerate() {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        let delay_ms = options.delay_ms;
        tasks.push(async move {
            if delay_ms > 0 && i > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms * i as u64)).await;
            }
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            engine.create(config).await
        });
    }

    let mut outcome = DispatchOutcome {
        launched: Vec::new(),
        failed: Vec::new(),
    };

    while let Some(result) = tasks.next().await {
        match result {
            Ok(id) => outcome.launched.push(id),
            Err(e) => {
                if options.stop_on_error {
                    return Err(e);
                }
                outcome.failed.push(e.to_string());
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jules_client::{CacheLayout, ClientConfig, Method, SessionIndexStore};
    use jules_client::error::Error;
    use jules_client::platform::FakePlatform;
    use jules_client::transport::Transport;
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        calls: AtomicUsize,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn request(
            &self,
            _method: Method,
            _path: &str,
            _query: &[(&str, String)],
            _body: Option<Value>,
            _cancelled: &(dyn Fn() -> bool + Sync),
        ) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_after {
                return Err(Error::ServerError { status: 500 });
            }
            Ok(json!({
                "id": format!("s{n}"),
                "createTime": "2024-01-01T00:00:00Z",
                "updateTime": "2024-01-01T00:00:00Z",
                "state": "QUEUED",
                "prompt": "do it",
                "automationMode": "AUTO_CREATE_PR",
            }))
        }
    }

    fn engine_with(transport: CountingTransport) -> Arc<SessionEngine> {
        let platform = Arc::new(FakePlatform::new());
        let index_store = Arc::new(SessionIndexStore::new(PathBuf::from("/cache"), platform.clone()));
        let layout = CacheLayout::new(PathBuf::from("/"));
        Arc::new(SessionEngine::new(
            Arc::new(transport),
            platform,
            index_store,
            layout,
            ClientConfig {
                polling_interval_ms: 0,
                ..ClientConfig::default()
            },
        ))
    }

    #[tokio::test]
    async fn dispatches_all_configs_bounded_by_concurrency() {
        let engine = engine_with(CountingTransport {
            calls: AtomicUsize::new(0),
            fail_after: None,
        });
        let configs = (0..5)
            .map(|_| CreateSessionConfig {
                prompt: "x".into(),
                ..Default::default()
            })
            .collect();
        let outcome = dispatch(engine, configs, &DispatchOptions::default()).await.unwrap();
        assert_eq!(outcome.launched.len(), 5);
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn stop_on_error_propagates_first_failure() {
        let engine = engine_with(CountingTransport {
            calls: AtomicUsize::new(0),
            fail_after: Some(0),
        });
        let configs = vec![CreateSessionConfig {
            prompt: "x".into(),
            ..Default::default()
        }];
        let result = dispatch(engine, configs, &DispatchOptions::default()).await;
        assert!(result.is_err());
    }
}
