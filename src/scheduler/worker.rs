//! The worker loop.
//!
//! A worker takes one ticket at a time from the queue, loads the job
//! specification the frontend wrote next to the job's working directory,
//! dispatches it and reports the outcome. Nothing that happens while
//! handling a ticket stops the loop; only the shutdown token does, and it
//! is only looked at between jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::{JobId, JobOutcome, JobRequest, Status, Ticket};
use super::queue::JobQueue;
use crate::config::WorkerConfig;
use crate::error::JobSpecError;
use crate::notify::{Notifier, StatusBridge};
use crate::pipeline::Dispatcher;
use crate::runner::StageRunner;

/// File name of the job specification inside a job directory.
const JOB_SPEC_FILE: &str = "job.json";

/// Returns `<results>/<id>/job.json`.
pub fn job_spec_path(results: &Path, id: &JobId) -> PathBuf {
    results.join(id.as_str()).join(JOB_SPEC_FILE)
}

/// Reads and decodes a job specification file.
pub fn read_job_request(path: &Path) -> Result<JobRequest, JobSpecError> {
    let content = std::fs::read(path).map_err(|source| JobSpecError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&content).map_err(|source| JobSpecError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the specification of job `id` from the results root.
pub fn load_job_request(results: &Path, id: &JobId) -> Result<JobRequest, JobSpecError> {
    read_job_request(&job_spec_path(results, id))
}

/// Single-consumer worker loop.
pub struct Worker<R: StageRunner> {
    results: PathBuf,
    poll_interval: Duration,
    queue: Arc<dyn JobQueue>,
    status: StatusBridge,
    dispatcher: Dispatcher<R>,
    notifier: Notifier,
}

impl<R: StageRunner> Worker<R> {
    pub fn new(
        config: &WorkerConfig,
        queue: Arc<dyn JobQueue>,
        dispatcher: Dispatcher<R>,
        notifier: Notifier,
    ) -> Self {
        Self {
            results: config.paths.results.clone(),
            poll_interval: config.worker.poll_interval(),
            status: StatusBridge::new(Arc::clone(&queue)),
            queue,
            dispatcher,
            notifier,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<R> {
        &self.dispatcher
    }

    /// Runs until `shutdown` is cancelled and returns the number of tickets
    /// handled.
    ///
    /// The token is checked before every poll. The idle sleep is cut short
    /// by cancellation; a running job never is.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        info!(results = %self.results.display(), "Worker started");
        let mut handled = 0u64;

        loop {
            if shutdown.is_cancelled() {
                info!(handled = handled, "Shutdown requested, worker exiting");
                break;
            }

            match self.queue.dequeue().await {
                Ok(Some(ticket)) => {
                    self.process_ticket(ticket).await;
                    handled += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Failed to dequeue ticket");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        handled
    }

    /// Handles one ticket and returns the terminal status recorded for it.
    pub async fn process_ticket(&self, ticket: Ticket) -> Status {
        let id = ticket.id;
        let mut lifecycle = self.status.lifecycle(id.clone());

        let mut request = match load_job_request(&self.results, &id) {
            Ok(request) => request,
            Err(e) => {
                // Without a request there is no address to notify.
                error!(job_id = %id, error = %e, "Failed to load job specification");
                lifecycle.advance(Status::Error).await;
                return lifecycle.current();
            }
        };

        // The ticket owns the working directory; the id inside the file does not.
        if request.id != id {
            warn!(job_id = %id, spec_id = %request.id, "Job specification carries a different id");
            request.id = id.clone();
        }

        lifecycle.advance(Status::Running).await;
        info!(job_id = %id, kind = request.job.kind(), "Processing job");

        let started = Instant::now();
        let outcome = self.dispatcher.run(&request).await;
        let duration = started.elapsed();

        match &outcome {
            JobOutcome::Success => info!(
                job_id = %id,
                duration_ms = duration.as_millis() as u64,
                "Job completed successfully"
            ),
            failure => error!(
                job_id = %id,
                duration_ms = duration.as_millis() as u64,
                outcome = %failure,
                "Job failed"
            ),
        }

        lifecycle.advance(outcome.status()).await;

        match &request.email {
            Some(email) => {
                let kind = outcome.template();
                if let Err(e) = self.notifier.notify(&id, email, kind).await {
                    error!(job_id = %id, template = %kind, error = %e, "Failed to send notification");
                }
            }
            None => debug!(job_id = %id, "No notification address"),
        }

        lifecycle.current()
    }
}
