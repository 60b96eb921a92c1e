//! Worker threads for index jobs
//!
//! Each worker:
//! - Owns one job and runs it to completion on a named OS thread
//! - Publishes the job's outcome on the fetcher's event channel
//! - Reports completion on a channel, even if the job panics

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use super::FetcherEvent;
use crate::error::{panic_message, FetcherError, JobError, JobResult};
use crate::job::{EventBus, IndexJob, JobId, JobOutcome, StopReason};

/// Sends the job id when dropped, so completion is reported on unwind too
struct CompletionGuard {
    job: JobId,
    done: Sender<JobId>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // The fetcher may already be gone
        let _ = self.done.send(self.job);
    }
}

/// A worker thread driving one index job
pub struct JobWorker {
    job: Arc<IndexJob>,
    handle: Option<JoinHandle<JobResult<JobOutcome>>>,
}

impl JobWorker {
    /// Spawn a named thread running `job`
    pub fn spawn(
        name: String,
        job: Arc<IndexJob>,
        done: Sender<JobId>,
        events: Arc<EventBus<FetcherEvent>>,
    ) -> Result<Self, FetcherError> {
        let id = job.id();
        let runner = Arc::clone(&job);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _guard = CompletionGuard { job: id, done };
                let result = runner.run();
                let outcome = match &result {
                    Ok(outcome) => StopReason::from(outcome),
                    Err(e) => StopReason::Failed(e.to_string()),
                };
                events.publish(FetcherEvent::JobFinished { job: id, outcome });
                result
            })
            .map_err(|e| FetcherError::SpawnFailed {
                job: id,
                reason: e.to_string(),
            })?;

        debug!(job = %id, "Worker spawned");
        Ok(Self {
            job,
            handle: Some(handle),
        })
    }

    pub fn job(&self) -> &Arc<IndexJob> {
        &self.job
    }

    /// True once the thread has exited or been joined
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// True until the worker has been joined
    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Wait for the worker to finish; joining twice returns `Ok(Completed)`
    pub fn join(&mut self) -> JobResult<JobOutcome> {
        let Some(handle) = self.handle.take() else {
            return Ok(JobOutcome::Completed);
        };
        match handle.join() {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(job = %self.job.id(), message = %message, "Worker panicked");
                Err(JobError::Panicked {
                    job: self.job.id(),
                    message,
                })
            }
        }
    }
}
