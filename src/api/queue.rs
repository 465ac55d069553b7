// src/api/queue.rs
//! Pending upstream calls and their ordering.
//!
//! High-priority entries go ahead of every queued normal entry but behind
//! earlier high-priority ones, so each tier stays FIFO. Retries are put
//! back at the very front.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::GovernorResult;

/// Zero-argument operation performing the actual upstream call.
pub type Execute = Arc<dyn Fn() -> BoxFuture<'static, GovernorResult<Value>> + Send + Sync>;

/// Outcome channel back to one caller.
pub type Reply = oneshot::Sender<GovernorResult<Arc<Value>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Live scores and anything the user is actively waiting on
    High,
    #[default]
    Normal,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Normal => write!(f, "NORMAL"),
        }
    }
}

pub struct QueuedRequest {
    pub id: u64,
    pub key: String,
    pub priority: Priority,
    pub retry_count: u32,
    execute: Execute,
    waiters: Vec<Reply>,
}

impl QueuedRequest {
    pub fn new(id: u64, key: String, priority: Priority, execute: Execute, reply: Reply) -> Self {
        Self {
            id,
            key,
            priority,
            retry_count: 0,
            execute,
            waiters: vec![reply],
        }
    }

    /// Starts the upstream call. The returned future is lazy until polled.
    pub fn start(&self) -> BoxFuture<'static, GovernorResult<Value>> {
        (self.execute)()
    }

    pub fn add_waiter(&mut self, reply: Reply) {
        self.waiters.push(reply);
    }

    pub fn extend_waiters(&mut self, replies: Vec<Reply>) {
        self.waiters.extend(replies);
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// False once every caller has dropped its result future.
    pub fn has_live_waiters(&self) -> bool {
        self.waiters.iter().any(|reply| !reply.is_closed())
    }

    /// Delivers the outcome to every waiter. Closed receivers are ignored.
    pub fn settle(self, outcome: GovernorResult<Arc<Value>>) {
        for reply in self.waiters {
            let _ = reply.send(outcome.clone());
        }
    }
}

impl fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new entry according to its priority tier.
    pub fn push(&mut self, request: QueuedRequest) {
        match request.priority {
            Priority::Normal => self.entries.push_back(request),
            Priority::High => {
                let pos = self
                    .entries
                    .iter()
                    .position(|queued| queued.priority == Priority::Normal && queued.retry_count == 0)
                    .unwrap_or(self.entries.len());
                self.entries.insert(pos, request);
            }
        }
    }

    /// Puts a retried entry back at the head of the queue.
    pub fn requeue_front(&mut self, request: QueuedRequest) {
        self.entries.push_front(request);
    }

    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut QueuedRequest> {
        self.entries.iter_mut().find(|queued| queued.key == key)
    }

    /// Moves a queued normal entry into the high tier. A retried entry is
    /// already ahead of every fresh one and is upgraded where it stands.
    pub fn promote(&mut self, key: &str) -> bool {
        let Some(pos) = self
            .entries
            .iter()
            .position(|queued| queued.key == key && queued.priority == Priority::Normal)
        else {
            return false;
        };
        if self.entries[pos].retry_count > 0 {
            self.entries[pos].priority = Priority::High;
            return true;
        }
        match self.entries.remove(pos) {
            Some(mut request) => {
                request.priority = Priority::High;
                self.push(request);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
