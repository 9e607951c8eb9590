//! Job intake: job definitions, the ticket store and the worker loop.
//!
//! - **JobQueue**: source of tickets (Redis in production, memory for tests)
//! - **Worker**: the single-consumer loop that turns tickets into outcomes
//! - **JobRequest**: the persisted job specification and its variants
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Frontend   │
//!                      │ (job.json +  │
//!                      │  enqueue)    │
//!                      └──────┬───────┘
//!                             │
//!                      ┌──────▼───────┐
//!                      │    Redis     │
//!                      │    Queue     │
//!                      └──────┬───────┘
//!                             │
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! Each worker is a separate process running exactly one job at a time.
//!
//! # Reliability Features
//!
//! - **Atomic dequeue**: RPOPLPUSH hands each ticket to exactly one worker
//! - **Transient errors**: queue failures are logged and retried, never fatal
//! - **Graceful shutdown**: the cancellation token is checked between jobs only

pub mod job;
pub mod mode;
pub mod queue;
pub mod worker;

pub use job::{
    IndexJob, JobId, JobOutcome, JobRequest, JobVariant, MsaJob, PairJob, SearchJob, Status,
    StructureSearchJob, Ticket,
};
pub use mode::{ModeFlag, MsaModeFlags};
pub use queue::{JobQueue, MemoryJobQueue, QueueError, RedisJobQueue};
pub use worker::{job_spec_path, load_job_request, read_job_request, Worker};
