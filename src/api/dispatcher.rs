// src/api/dispatcher.rs
//! Single consumer task that owns the request queue.
//!
//! Every governor spawns exactly one dispatcher. Callers hand it work over
//! an unbounded channel; it enforces the dispatch spacing and the
//! concurrency cap, polls in-flight calls, requeues retryable failures
//! and fans results out to every waiting caller.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use super::cache::ResponseCache;
use super::queue::{Execute, Priority, QueuedRequest, Reply, RequestQueue};
use super::stats::GovernorCounters;
use crate::config::GovernorConfig;
use crate::error::{GovernorError, GovernorResult};

/// Work handed from a governor handle to its dispatcher.
pub(crate) struct Submission {
    pub key: String,
    pub priority: Priority,
    pub execute: Execute,
    pub reply: Reply,
}

struct Completion {
    request: QueuedRequest,
    result: GovernorResult<Value>,
}

pub(crate) struct Dispatcher {
    config: GovernorConfig,
    cache: Arc<ResponseCache>,
    counters: Arc<GovernorCounters>,
    rx: mpsc::UnboundedReceiver<Submission>,
    queue: RequestQueue,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    /// Callers that joined a key while its call was already in flight
    joined: HashMap<String, Vec<Reply>>,
    last_dispatch: Option<Instant>,
    paused_until: Option<Instant>,
    consecutive_rate_limits: u32,
    next_id: u64,
}

impl Dispatcher {
    pub(crate) fn new(
        config: GovernorConfig,
        cache: Arc<ResponseCache>,
        counters: Arc<GovernorCounters>,
        rx: mpsc::UnboundedReceiver<Submission>,
    ) -> Self {
        Self {
            config,
            cache,
            counters,
            rx,
            queue: RequestQueue::new(),
            in_flight: FuturesUnordered::new(),
            joined: HashMap::new(),
            last_dispatch: None,
            paused_until: None,
            consecutive_rate_limits: 0,
            next_id: 1,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(
            "🚦 Request dispatcher started (interval: {:?}, max concurrent: {}, max retries: {})",
            self.config.min_request_interval(),
            self.config.max_concurrent_requests,
            self.config.max_retries
        );
        let mut closed = false;

        loop {
            let wake_at = self.drain();
            if closed && self.queue.is_empty() && self.in_flight.is_empty() {
                break;
            }

            tokio::select! {
                submission = self.rx.recv(), if !closed => match submission {
                    Some(submission) => self.accept(submission),
                    None => {
                        debug!("All governor handles dropped; finishing remaining work");
                        closed = true;
                    }
                },
                Some(completion) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.complete(completion);
                }
                _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {}
            }
        }

        info!("🛑 Request dispatcher stopped");
    }

    /// Dispatches as much queued work as the gates allow. Returns the instant
    /// at which the next dispatch becomes possible when a timer is what
    /// blocks it.
    fn drain(&mut self) -> Option<Instant> {
        loop {
            if self.queue.is_empty() || self.in_flight.len() >= self.config.max_concurrent_requests {
                return None;
            }

            let now = Instant::now();
            if let Some(until) = self.paused_until {
                if now < until {
                    return Some(until);
                }
                self.paused_until = None;
            }
            if let Some(last) = self.last_dispatch {
                let ready_at = last + self.config.min_request_interval();
                if now < ready_at {
                    return Some(ready_at);
                }
            }

            let request = self.queue.pop_front()?;
            GovernorCounters::set(&self.counters.queued, self.queue.len());
            if !request.has_live_waiters() {
                GovernorCounters::bump(&self.counters.cancelled);
                debug!("🗑️ Dropping request #{} for {}: no caller is waiting", request.id, request.key);
                continue;
            }
            self.dispatch(request, now);
        }
    }

    fn dispatch(&mut self, request: QueuedRequest, now: Instant) {
        self.last_dispatch = Some(now);
        self.joined.entry(request.key.clone()).or_default();

        debug!(
            "📤 Dispatching request #{} {} ({} priority, attempt {}, in flight: {})",
            request.id,
            request.key,
            request.priority,
            request.retry_count + 1,
            self.in_flight.len() + 1
        );

        let timeout = self.config.request_timeout();
        let call = request.start();
        self.in_flight.push(
            async move {
                let result = match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(GovernorError::Timeout(timeout)),
                };
                Completion { request, result }
            }
            .boxed(),
        );

        GovernorCounters::bump(&self.counters.dispatched);
        GovernorCounters::set(&self.counters.in_flight, self.in_flight.len());
    }

    fn accept(&mut self, submission: Submission) {
        let Submission { key, priority, execute, reply } = submission;

        // The same key may have completed between the caller's cache check and now.
        if let Some(data) = self.cache.peek(&key) {
            let _ = reply.send(Ok(data));
            return;
        }

        if let Some(waiters) = self.joined.get_mut(&key) {
            waiters.push(reply);
            GovernorCounters::bump(&self.counters.coalesced);
            debug!("🔗 Joined in-flight request for {}", key);
            return;
        }

        if let Some(existing) = self.queue.find_mut(&key) {
            existing.add_waiter(reply);
            let needs_promotion = priority == Priority::High && existing.priority == Priority::Normal;
            if needs_promotion {
                self.queue.promote(&key);
            }
            GovernorCounters::bump(&self.counters.coalesced);
            debug!("🔗 Joined queued request for {}", key);
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.queue.push(QueuedRequest::new(id, key, priority, execute, reply));
        GovernorCounters::set(&self.counters.queued, self.queue.len());
        debug!("📝 Queued request #{} ({} priority, queue size: {})", id, priority, self.queue.len());
    }

    fn complete(&mut self, completion: Completion) {
        let Completion { mut request, result } = completion;
        GovernorCounters::set(&self.counters.in_flight, self.in_flight.len());

        let joined = self.joined.remove(&request.key).unwrap_or_default();
        request.extend_waiters(joined);

        match result {
            Ok(value) => {
                self.consecutive_rate_limits = 0;
                let data = Arc::new(value);
                self.cache.insert(request.key.clone(), Arc::clone(&data));
                GovernorCounters::bump(&self.counters.succeeded);
                debug!(
                    "✅ Request #{} {} succeeded after {} attempt(s), {} waiter(s)",
                    request.id,
                    request.key,
                    request.retry_count + 1,
                    request.waiter_count()
                );
                request.settle(Ok(data));
            }
            Err(err) => {
                if err.is_rate_limited() {
                    GovernorCounters::bump(&self.counters.rate_limited);
                    self.start_cooldown(&err);
                }

                if !err.is_retryable() {
                    GovernorCounters::bump(&self.counters.failed);
                    error!("❌ Request #{} {} failed: {}", request.id, request.key, err);
                    request.settle(Err(err));
                } else if request.retry_count < self.config.max_retries {
                    request.retry_count += 1;
                    GovernorCounters::bump(&self.counters.retried);
                    warn!(
                        "🔁 Request #{} {} failed ({}), requeueing retry {}/{}",
                        request.id, request.key, err, request.retry_count, self.config.max_retries
                    );
                    self.queue.requeue_front(request);
                    GovernorCounters::set(&self.counters.queued, self.queue.len());
                } else {
                    GovernorCounters::bump(&self.counters.failed);
                    let attempts = request.retry_count + 1;
                    error!(
                        "❌ Request #{} {} gave up after {} attempts: {}",
                        request.id, request.key, attempts, err
                    );
                    request.settle(Err(GovernorError::RetriesExhausted {
                        attempts,
                        last: Box::new(err),
                    }));
                }
            }
        }
    }

    /// Pauses every dispatch after a rate-limit hit.
    fn start_cooldown(&mut self, err: &GovernorError) {
        self.consecutive_rate_limits += 1;

        let retry_after = match err {
            GovernorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        let Some(delay) = cooldown_delay(&self.config, self.consecutive_rate_limits, retry_after) else {
            return;
        };

        let until = Instant::now() + delay;
        self.paused_until = Some(match self.paused_until {
            Some(current) if current > until => current,
            _ => until,
        });
        warn!(
            "⏳ Upstream rate limit hit (consecutive: {}), pausing dispatch for {:?}",
            self.consecutive_rate_limits, delay
        );
    }
}

/// Cooldown after the `consecutive`-th rate-limit hit in a row. A server
/// supplied `Retry-After` wins over the exponential schedule. `None` when
/// the cooldown is disabled.
pub(crate) fn cooldown_delay(
    config: &GovernorConfig,
    consecutive: u32,
    retry_after: Option<Duration>,
) -> Option<Duration> {
    let base = config.rate_limit_backoff();
    if base.is_zero() {
        return None;
    }
    let max = config.max_rate_limit_backoff();

    if let Some(server_delay) = retry_after {
        return Some(server_delay.min(max));
    }

    let exponent = consecutive.saturating_sub(1).min(16);
    let mut delay = base.saturating_mul(2u32.pow(exponent)).min(max);
    if config.backoff_jitter {
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        delay = delay.mul_f64(factor).min(max);
    }
    Some(delay)
}
