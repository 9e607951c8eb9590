//! Ticket store backing the worker loop.
//!
//! The worker only needs two operations from the queue: take the next
//! ticket and record a status. Two implementations are provided:
//!
//! - `RedisJobQueue`: shared store used in production, safe for any number
//!   of independent worker processes
//! - `MemoryJobQueue`: in-process store for one-shot runs and tests
//!
//! # Redis Structure
//!
//! - `{prefix}:pending`: list of job ids waiting for a worker
//! - `{prefix}:running`: list of job ids currently held by a worker
//! - `{prefix}:status`: hash of job id to status string
//!
//! Ids are moved from pending to running atomically with RPOPLPUSH, so a
//! ticket is never handed to two workers. A terminal status removes the id
//! from the running list.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use super::job::{JobId, Status, Ticket};

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// A stored status could not be parsed.
    #[error("Invalid status '{value}' stored for job {id}")]
    InvalidStatus { id: JobId, value: String },

    /// The queue backend is unavailable.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Source of tickets and sink of status transitions.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Takes the next pending ticket, or `None` when the queue is empty.
    async fn dequeue(&self) -> Result<Option<Ticket>, QueueError>;

    /// Records the status of a job.
    async fn set_status(&self, id: &JobId, status: Status) -> Result<(), QueueError>;
}

/// Redis-backed ticket store.
pub struct RedisJobQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    pending_key: String,
    running_key: String,
    status_key: String,
}

impl RedisJobQueue {
    /// Connects to Redis and creates a new ticket store.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `prefix` - Key prefix shared by all workers of one deployment
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, prefix))
    }

    /// Creates a RedisJobQueue from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, prefix: &str) -> Self {
        Self {
            redis,
            pending_key: format!("{}:pending", prefix),
            running_key: format!("{}:running", prefix),
            status_key: format!("{}:status", prefix),
        }
    }

    /// Adds a job id to the pending list and marks it queued.
    pub async fn enqueue(&self, id: &JobId) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&self.status_key, id.as_str(), Status::Queued.as_str())
            .lpush(&self.pending_key, id.as_str());
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Returns the recorded status of a job, if any.
    pub async fn status(&self, id: &JobId) -> Result<Option<Status>, QueueError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.hget(&self.status_key, id.as_str()).await?;
        match value {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| QueueError::InvalidStatus {
                    id: id.clone(),
                    value,
                }),
            None => Ok(None),
        }
    }

    /// Returns the number of pending tickets.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.pending_key).await?;
        Ok(len)
    }

    /// Returns whether no tickets are pending.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn dequeue(&self) -> Result<Option<Ticket>, QueueError> {
        let mut conn = self.redis.clone();
        let id: Option<String> = conn.rpoplpush(&self.pending_key, &self.running_key).await?;
        Ok(id.map(Ticket::new))
    }

    async fn set_status(&self, id: &JobId, status: Status) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&self.status_key, id.as_str(), status.as_str())
            .ignore();
        if status.is_terminal() {
            pipe.lrem(&self.running_key, 0, id.as_str()).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    pending: VecDeque<JobId>,
    statuses: HashMap<JobId, Status>,
    history: Vec<(JobId, Status)>,
    dequeue_failures: usize,
    status_failures: usize,
}

/// In-process ticket store.
///
/// Records every status write so callers can inspect the full transition
/// history of a job. Failures can be injected to exercise error paths.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<MemoryState>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job id to the pending list and marks it queued.
    pub fn push(&self, id: impl Into<String>) {
        let id = JobId::new(id);
        let mut state = self.lock();
        state.statuses.insert(id.clone(), Status::Queued);
        state.pending.push_back(id);
    }

    /// Makes the next `count` dequeue calls fail.
    pub fn fail_next_dequeues(&self, count: usize) {
        self.lock().dequeue_failures = count;
    }

    /// Makes the next `count` status writes fail.
    pub fn fail_next_status_writes(&self, count: usize) {
        self.lock().status_failures = count;
    }

    /// Returns the current status of a job.
    pub fn status(&self, id: &JobId) -> Option<Status> {
        self.lock().statuses.get(id).copied()
    }

    /// Returns every status written for a job, in order.
    pub fn history(&self, id: &JobId) -> Vec<Status> {
        self.lock()
            .history
            .iter()
            .filter(|(job, _)| job == id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Returns the number of pending tickets.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test thread panicked mid-update;
        // the state itself is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn dequeue(&self) -> Result<Option<Ticket>, QueueError> {
        let mut state = self.lock();
        if state.dequeue_failures > 0 {
            state.dequeue_failures -= 1;
            return Err(QueueError::Unavailable("injected dequeue failure".to_string()));
        }
        Ok(state.pending.pop_front().map(|id| Ticket { id }))
    }

    async fn set_status(&self, id: &JobId, status: Status) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(QueueError::Unavailable("injected status failure".to_string()));
        }
        state.statuses.insert(id.clone(), status);
        state.history.push((id.clone(), status));
        Ok(())
    }
}
