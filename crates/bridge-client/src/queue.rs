//! Process-global FIFO command queue, duplicate-id suppression, and the
//! per-socket pending index.
//!
//! Exactly one worker drains the queue, so at most one browser-operation
//! invocation is ever in flight.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

pub const MAX_GLOBAL_QUEUE_SIZE: usize = 200;
pub const QUEUE_WAIT_TIMEOUT_MS: u64 = 20_000;
pub const COMPLETED_ID_MAX: usize = 2_000;
pub const COMPLETED_ID_TTL_MS: u64 = 120_000;

pub type SocketKey = Uuid;

#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub id: String,
    pub socket_key: SocketKey,
    pub cmd: String,
    pub params: Value,
    pub enqueued_at: Instant,
    pub deadline: Instant,
}

impl QueuedCommand {
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.deadline
    }
}

/// Why admission of an incoming `cmd` was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejection {
    DuplicateRequestId,
    QueueOverflow,
}

struct RecentlyCompleted {
    order: VecDeque<(String, Instant)>,
    ids: HashSet<String>,
    ttl: Duration,
    max_size: usize,
}

impl RecentlyCompleted {
    fn new(ttl: Duration, max_size: usize) -> Self {
        Self { order: VecDeque::new(), ids: HashSet::new(), ttl, max_size }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((_, completed_at)) = self.order.front() {
            if now.duration_since(*completed_at) >= self.ttl {
                let (id, _) = self.order.pop_front().unwrap();
                self.ids.remove(&id);
            } else {
                break;
            }
        }
        while self.order.len() > self.max_size {
            if let Some((id, _)) = self.order.pop_front() {
                self.ids.remove(&id);
            }
        }
    }

    fn contains(&mut self, id: &str, now: Instant) -> bool {
        self.evict_expired(now);
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String, now: Instant) {
        self.evict_expired(now);
        if self.ids.insert(id.clone()) {
            self.order.push_back((id, now));
        }
    }
}

/// The process-wide command queue plus its id-tracking side tables. All
/// methods take `&mut self`; callers (the supervisor) hold this behind a
/// single mutex.
pub struct CommandQueue {
    items: VecDeque<QueuedCommand>,
    active_ids: HashSet<String>,
    recently_completed: RecentlyCompleted,
    queue_wait_timeout: Duration,
    max_size: usize,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(MAX_GLOBAL_QUEUE_SIZE, Duration::from_millis(QUEUE_WAIT_TIMEOUT_MS))
    }
}

impl CommandQueue {
    pub fn new(max_size: usize, queue_wait_timeout: Duration) -> Self {
        Self {
            items: VecDeque::new(),
            active_ids: HashSet::new(),
            recently_completed: RecentlyCompleted::new(Duration::from_millis(COMPLETED_ID_TTL_MS), COMPLETED_ID_MAX),
            queue_wait_timeout,
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Runs the admission checks (duplicate id, then overflow) and, on
    /// success, enqueues the command and marks its id active.
    pub fn admit(
        &mut self,
        id: String,
        socket_key: SocketKey,
        cmd: String,
        params: Value,
        now: Instant,
    ) -> Result<(), AdmissionRejection> {
        if self.active_ids.contains(&id) || self.recently_completed.contains(&id, now) {
            return Err(AdmissionRejection::DuplicateRequestId);
        }
        if self.items.len() >= self.max_size {
            return Err(AdmissionRejection::QueueOverflow);
        }
        let deadline = now + self.queue_wait_timeout;
        self.items.push_back(QueuedCommand { id: id.clone(), socket_key, cmd, params, enqueued_at: now, deadline });
        self.active_ids.insert(id);
        Ok(())
    }

    /// Pops the next item in FIFO order, if any.
    pub fn dequeue(&mut self) -> Option<QueuedCommand> {
        self.items.pop_front()
    }

    /// Marks an id as finished: no longer active, and recorded as recently
    /// completed so a resubmission within the TTL is rejected as a
    /// duplicate.
    pub fn mark_completed(&mut self, id: &str, now: Instant) {
        self.active_ids.remove(id);
        self.recently_completed.insert(id.to_string(), now);
    }

    /// Removes every item owned by `socket_key` from the queue (socket
    /// finalized while work was still pending) and marks their ids
    /// completed. The owning socket is already gone, so the caller has
    /// nowhere to send a terminal response; it just drops the items.
    pub fn purge_socket(&mut self, socket_key: SocketKey, now: Instant) -> Vec<QueuedCommand> {
        let mut removed = Vec::new();
        self.items.retain(|item| {
            if item.socket_key == socket_key {
                removed.push(item.clone());
                false
            } else {
                true
            }
        });
        for item in &removed {
            self.mark_completed(&item.id, now);
        }
        removed
    }
}
