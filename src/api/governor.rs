// src/api/governor.rs
//! Request governor: the single entry point for upstream data calls.
//!
//! A [`Governor`] is constructed explicitly and cloned into whatever needs
//! it; clones share one queue, one cache and one dispatcher task. Cache hits
//! are served directly from the handle without touching the queue.

use futures::FutureExt;
use log::{debug, info};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::cache::{cache_key, normalize_endpoint, RequestParams, ResponseCache};
use super::dispatcher::{Dispatcher, Submission};
use super::queue::{Execute, Priority};
use super::stats::{GovernorCounters, GovernorStats};
use super::upstream::Upstream;
use crate::config::GovernorConfig;
use crate::error::{GovernorError, GovernorResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub priority: Priority,
}

impl RequestOptions {
    pub fn high() -> Self {
        Self { priority: Priority::High }
    }

    pub fn with_priority(priority: Priority) -> Self {
        Self { priority }
    }
}

/// What [`Governor::invalidate`] should drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    All,
    /// A single cache key, as produced by [`cache_key`]
    Key(String),
}

struct Inner {
    cache: Arc<ResponseCache>,
    counters: Arc<GovernorCounters>,
    upstream: Arc<dyn Upstream>,
    tx: mpsc::UnboundedSender<Submission>,
}

#[derive(Clone)]
pub struct Governor {
    inner: Arc<Inner>,
}

impl Governor {
    /// Validates `config` and spawns the dispatcher task.
    ///
    /// Must be called from within a Tokio runtime. The dispatcher exits once
    /// every clone of the returned handle is dropped and its remaining work
    /// has settled.
    pub fn new(config: GovernorConfig, upstream: Arc<dyn Upstream>) -> GovernorResult<Self> {
        config.validate()?;

        let cache = Arc::new(ResponseCache::from_config(&config));
        let counters = Arc::new(GovernorCounters::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher::new(config, Arc::clone(&cache), Arc::clone(&counters), rx);
        tokio::spawn(dispatcher.run());

        info!(
            "🏗️ Request governor ready for {} (credential: {})",
            upstream.name(),
            if upstream.has_credential() { "present" } else { "missing" }
        );

        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                counters,
                upstream,
                tx,
            }),
        })
    }

    /// Fetches `endpoint` with `params` through the cache, the queue and the
    /// retry policy.
    ///
    /// Without a credential this fails with [`GovernorError::NoCredential`]
    /// immediately; callers decide whether to fall back to substitute data.
    pub async fn request(
        &self,
        endpoint: &str,
        params: &RequestParams,
        options: RequestOptions,
    ) -> GovernorResult<Arc<Value>> {
        let endpoint = normalize_endpoint(endpoint);
        if endpoint == "/" {
            return Err(GovernorError::InvalidRequest(
                "endpoint must not be empty".to_string(),
            ));
        }
        if !self.inner.upstream.has_credential() {
            debug!("🔑 No credential configured, rejecting {}", endpoint);
            return Err(GovernorError::NoCredential);
        }

        let key = cache_key(&endpoint, params);
        if let Some(data) = self.inner.cache.get(&key) {
            return Ok(data);
        }

        let upstream = Arc::clone(&self.inner.upstream);
        let params = params.clone();
        let execute: Execute = Arc::new(move || {
            let upstream = Arc::clone(&upstream);
            let endpoint = endpoint.clone();
            let params = params.clone();
            async move { upstream.fetch(&endpoint, &params).await }.boxed()
        });

        self.submit(key, options.priority, execute).await
    }

    /// Runs a caller-supplied operation under the same cache, queue and retry
    /// policy, cached under `key`. No credential check is applied.
    pub async fn request_with(
        &self,
        key: impl Into<String>,
        options: RequestOptions,
        execute: Execute,
    ) -> GovernorResult<Arc<Value>> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(GovernorError::InvalidRequest(
                "cache key must not be empty".to_string(),
            ));
        }
        if let Some(data) = self.inner.cache.get(&key) {
            return Ok(data);
        }
        self.submit(key, options.priority, execute).await
    }

    async fn submit(
        &self,
        key: String,
        priority: Priority,
        execute: Execute,
    ) -> GovernorResult<Arc<Value>> {
        let (reply, outcome) = oneshot::channel();
        self.inner
            .tx
            .send(Submission {
                key,
                priority,
                execute,
                reply,
            })
            .map_err(|_| GovernorError::Shutdown)?;

        outcome.await.map_err(|_| GovernorError::Shutdown)?
    }

    /// Clears cached responses. In-flight requests are unaffected. Returns
    /// the number of entries removed.
    pub fn invalidate(&self, target: Invalidation) -> usize {
        let removed = match &target {
            Invalidation::All => self.inner.cache.clear(),
            Invalidation::Key(key) => usize::from(self.inner.cache.invalidate(key)),
        };
        info!("🧽 Cache invalidated ({:?}): {} entr(ies) removed", target, removed);
        removed
    }

    /// Drops the cached response for one endpoint + params combination.
    pub fn invalidate_request(&self, endpoint: &str, params: &RequestParams) -> bool {
        self.invalidate(Invalidation::Key(cache_key(endpoint, params))) > 0
    }

    pub fn stats(&self) -> GovernorStats {
        GovernorStats::snapshot(&self.inner.counters, self.inner.cache.metrics())
    }

    pub fn has_credential(&self) -> bool {
        self.inner.upstream.has_credential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::cache::params;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoUpstream {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Upstream for EchoUpstream {
        async fn fetch(&self, endpoint: &str, params: &RequestParams) -> GovernorResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "endpoint": endpoint, "params": params }))
        }
    }

    fn governor() -> (Governor, Arc<EchoUpstream>) {
        let upstream = Arc::new(EchoUpstream { calls: AtomicUsize::new(0) });
        let config = GovernorConfig {
            min_request_interval_ms: 0,
            ..GovernorConfig::default()
        };
        (Governor::new(config, upstream.clone()).unwrap(), upstream)
    }

    #[tokio::test]
    async fn test_empty_endpoint_is_rejected_before_queueing() {
        let (governor, upstream) = governor();
        let err = governor.request("  /  ", &RequestParams::new(), RequestOptions::default()).await;
        assert!(matches!(err, Err(GovernorError::InvalidRequest(_))));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unbounded_interval_is_rejected_at_construction() {
        let upstream = Arc::new(EchoUpstream { calls: AtomicUsize::new(0) });
        let config = GovernorConfig {
            min_request_interval_ms: u64::MAX,
            ..GovernorConfig::default()
        };
        assert!(matches!(Governor::new(config, upstream), Err(GovernorError::Config(_))));
    }

    #[tokio::test]
    async fn test_invalidate_single_request() {
        let (governor, upstream) = governor();
        let p = params([("id", 33)]);

        governor.request("/teams", &p, RequestOptions::default()).await.unwrap();
        assert!(governor.invalidate_request("teams", &p));
        assert!(!governor.invalidate_request("teams", &p));
        governor.request("/teams", &p, RequestOptions::default()).await.unwrap();

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_request_with_custom_execute_is_cached() {
        let (governor, _) = governor();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let execute: Execute = Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GovernorError>(json!({"favorites": [33, 40]}))
            }
            .boxed()
        });

        let first = governor.request_with("backend:favorites", RequestOptions::default(), execute.clone()).await.unwrap();
        let second = governor.request_with("backend:favorites", RequestOptions::default(), execute).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(governor.stats().cache.hits, 1);
    }
}
