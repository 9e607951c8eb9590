//! Best-effort status reporting.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::scheduler::{JobId, JobQueue, Status};

/// Writes ticket statuses to the queue, logging rather than returning errors.
#[derive(Clone)]
pub struct StatusBridge {
    queue: Arc<dyn JobQueue>,
}

impl StatusBridge {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Records `status` for `id`. Returns false if the write failed.
    pub async fn set_status(&self, id: &JobId, status: Status) -> bool {
        match self.queue.set_status(id, status).await {
            Ok(()) => {
                debug!(job_id = %id, status = %status, "Status recorded");
                true
            }
            Err(e) => {
                error!(job_id = %id, status = %status, error = %e, "Failed to record status");
                false
            }
        }
    }

    /// Starts tracking a freshly dequeued ticket.
    pub fn lifecycle(&self, id: JobId) -> Lifecycle<'_> {
        Lifecycle {
            bridge: self,
            id,
            current: Status::Queued,
        }
    }
}

/// Status machine of one ticket, starting at `queued`.
///
/// Transitions that would move backwards or leave a terminal status are
/// refused and never reach the queue.
pub struct Lifecycle<'a> {
    bridge: &'a StatusBridge,
    id: JobId,
    current: Status,
}

impl Lifecycle<'_> {
    pub fn current(&self) -> Status {
        self.current
    }

    /// Moves to `next` and records it. Returns false if the transition was
    /// refused.
    ///
    /// A failed status write does not roll the machine back: the job has
    /// moved on regardless of what the queue recorded.
    pub async fn advance(&mut self, next: Status) -> bool {
        if !self.current.can_transition_to(next) {
            warn!(
                job_id = %self.id,
                from = %self.current,
                to = %next,
                "Refusing status transition"
            );
            return false;
        }
        self.current = next;
        self.bridge.set_status(&self.id, next).await;
        true
    }
}
