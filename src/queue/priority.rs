//! Priority Event Queue
//!
//! Five FIFO buckets indexed by priority (1 = most urgent) behind a single
//! `put`/`get` interface. The queue also counts outstanding items per emitting
//! module, which the manager exposes as each module's outgoing depth for
//! backpressure.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::error::{QueueError, QueueResult};
use crate::event::{EmittedEvent, Event};

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 5;
const BUCKETS: usize = (MAX_PRIORITY - MIN_PRIORITY + 1) as usize;

/// Items that carry a dispatch priority and an emitting module
pub trait Prioritized {
    /// Raw priority; clamped to `1..=5` on insertion
    fn priority(&self) -> u8;

    /// Module credited with the item, for outgoing-depth accounting
    fn module_name(&self) -> Option<&str>;
}

impl Prioritized for Arc<Event> {
    fn priority(&self) -> u8 {
        self.module_priority()
    }

    fn module_name(&self) -> Option<&str> {
        self.module()
    }
}

impl Prioritized for EmittedEvent {
    fn priority(&self) -> u8 {
        self.event.module_priority()
    }

    fn module_name(&self) -> Option<&str> {
        self.event.module()
    }
}

/// How `get` chooses among non-empty buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DequeuePolicy {
    /// Smooth weighted round-robin with weights 5,4,3,2,1. Lower priorities
    /// are served less often but never starve.
    #[default]
    Weighted,
    /// Always serve the most urgent non-empty bucket
    Strict,
}

impl FromStr for DequeuePolicy {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weighted" => Ok(DequeuePolicy::Weighted),
            "strict" => Ok(DequeuePolicy::Strict),
            _ => Err(QueueError::InvalidPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for DequeuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DequeuePolicy::Weighted => write!(f, "weighted"),
            DequeuePolicy::Strict => write!(f, "strict"),
        }
    }
}

/// A queued item with its effective priority and arrival sequence
#[derive(Debug, Clone)]
pub struct QueueEntry<T> {
    pub priority: u8,
    pub sequence: u64,
    pub item: T,
}

struct Buckets<T> {
    queues: [VecDeque<QueueEntry<T>>; BUCKETS],
    credit: [i64; BUCKETS],
    next_sequence: u64,
    len: usize,
}

impl<T> Buckets<T> {
    fn new() -> Self {
        Self {
            queues: std::array::from_fn(|_| VecDeque::new()),
            credit: [0; BUCKETS],
            next_sequence: 0,
            len: 0,
        }
    }

    fn weight(bucket: usize) -> i64 {
        (BUCKETS - bucket) as i64
    }

    fn select(&mut self, policy: DequeuePolicy) -> Option<usize> {
        match policy {
            DequeuePolicy::Strict => self.queues.iter().position(|q| !q.is_empty()),
            DequeuePolicy::Weighted => {
                let mut total = 0;
                let mut best: Option<usize> = None;
                for bucket in 0..BUCKETS {
                    if self.queues[bucket].is_empty() {
                        continue;
                    }
                    let weight = Self::weight(bucket);
                    self.credit[bucket] += weight;
                    total += weight;
                    if best.map_or(true, |b| self.credit[bucket] > self.credit[b]) {
                        best = Some(bucket);
                    }
                }
                if let Some(bucket) = best {
                    self.credit[bucket] -= total;
                }
                best
            }
        }
    }

    fn pop(&mut self, policy: DequeuePolicy) -> Option<QueueEntry<T>> {
        let bucket = self.select(policy)?;
        let entry = self.queues[bucket].pop_front()?;
        self.len -= 1;
        if self.len == 0 {
            // fresh start once drained
            self.credit = [0; BUCKETS];
        }
        Some(entry)
    }
}

/// Multi-bucket priority queue
pub struct EventQueue<T> {
    buckets: Mutex<Buckets<T>>,
    modules: DashMap<String, usize>,
    policy: DequeuePolicy,
    available: Notify,
}

impl<T: Prioritized> EventQueue<T> {
    pub fn new(policy: DequeuePolicy) -> Self {
        Self {
            buckets: Mutex::new(Buckets::new()),
            modules: DashMap::new(),
            policy,
            available: Notify::new(),
        }
    }

    pub fn policy(&self) -> DequeuePolicy {
        self.policy
    }

    /// Push an item onto the bucket matching its clamped priority
    pub fn put(&self, item: T) {
        let priority = item.priority().clamp(MIN_PRIORITY, MAX_PRIORITY);
        if let Some(module) = item.module_name() {
            *self.modules.entry(module.to_string()).or_insert(0) += 1;
        }
        {
            let mut buckets = self.buckets.lock();
            let sequence = buckets.next_sequence;
            buckets.next_sequence += 1;
            buckets.queues[usize::from(priority - MIN_PRIORITY)].push_back(QueueEntry {
                priority,
                sequence,
                item,
            });
            buckets.len += 1;
        }
        self.available.notify_one();
    }

    /// Take the next entry without waiting
    pub fn get_entry_nowait(&self) -> QueueResult<QueueEntry<T>> {
        let entry = self.buckets.lock().pop(self.policy).ok_or(QueueError::Empty)?;
        self.release(&entry.item);
        Ok(entry)
    }

    /// Take the next item without waiting
    pub fn get_nowait(&self) -> QueueResult<T> {
        self.get_entry_nowait().map(|entry| entry.item)
    }

    /// Wait up to `timeout` for the next item.
    ///
    /// Returns [`QueueError::Empty`] if nothing arrived in time.
    pub async fn get(&self, timeout: Duration) -> QueueResult<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            if let Ok(item) = self.get_nowait() {
                return Ok(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.get_nowait();
            }
        }
    }

    /// Total items across all buckets
    pub fn qsize(&self) -> usize {
        self.buckets.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.qsize() == 0
    }

    /// Items per bucket, most urgent first
    pub fn bucket_sizes(&self) -> [usize; BUCKETS] {
        let buckets = self.buckets.lock();
        std::array::from_fn(|i| buckets.queues[i].len())
    }

    /// Outstanding items credited to `module`
    pub fn module_depth(&self, module: &str) -> usize {
        self.modules.get(module).map(|count| *count).unwrap_or(0)
    }

    /// Remove every item, most urgent first
    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        {
            let mut buckets = self.buckets.lock();
            for queue in buckets.queues.iter_mut() {
                drained.extend(queue.drain(..).map(|entry| entry.item));
            }
            buckets.len = 0;
            buckets.credit = [0; BUCKETS];
        }
        for item in &drained {
            self.release(item);
        }
        drained
    }

    fn release(&self, item: &T) {
        if let Some(module) = item.module_name() {
            if let Some(mut count) = self.modules.get_mut(module) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

impl<T> fmt::Debug for EventQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = self.buckets.lock();
        f.debug_struct("EventQueue")
            .field("policy", &self.policy)
            .field("len", &buckets.len)
            .finish()
    }
}
