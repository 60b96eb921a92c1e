//! Fetcher coordinator - splits a range and runs one job per chunk
//!
//! The coordinator is responsible for:
//! - Validating the range and weights
//! - Planning chunks and creating a job per chunk
//! - Spawning a worker thread per job
//! - Waiting for, canceling and summarizing the jobs

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use super::split;
use super::worker::JobWorker;
use super::FetcherEvent;
use crate::error::{FetcherError, JobError, Result};
use crate::flag::builtin::{PENDING, RUNNING, STOPPING};
use crate::flag::{task_vocabulary, FlagGroup};
use crate::job::{
    EventBus, Handlers, IndexJob, JobEvent, JobId, JumpPolicy, Listener, ProbeHandler,
};
use crate::span::StepSpan;

/// Default fetcher name, used as the worker thread prefix
pub const DEFAULT_NAME: &str = "fetcher";

/// Aggregated probe counts across a fetcher's jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    /// Jobs created by the last start
    pub jobs: usize,

    /// Jobs that have reached a stopping state
    pub stopped_jobs: usize,

    /// Handler invocations
    pub probes: u64,

    /// Accepted indices
    pub accepted: u64,

    /// Skipped indices
    pub skipped: u64,

    /// Unexpected handler failures
    pub errors: u64,
}

/// Workers of the current start plus their completion channel
struct Run {
    workers: Vec<JobWorker>,
    done: Receiver<JobId>,
    first_error: Option<JobError>,
}

impl Run {
    fn pending(&self) -> usize {
        self.workers.iter().filter(|w| w.is_pending()).count()
    }
}

/// Splits an index range by weight and probes the chunks in parallel
pub struct IndexFetcher {
    name: String,
    span: StepSpan,
    weights: Vec<f64>,
    jump: JumpPolicy,
    handlers: RwLock<Handlers>,
    job_listeners: RwLock<Vec<Listener<JobEvent>>>,
    events: Arc<EventBus<FetcherEvent>>,
    flags: FlagGroup,
    jobs: RwLock<Vec<Arc<IndexJob>>>,
    run: Mutex<Option<Run>>,
}

/// Builder for [`IndexFetcher`]
#[derive(Debug, Clone)]
pub struct FetcherBuilder {
    name: String,
    begin: i64,
    end: Option<i64>,
    step: i64,
    weights: Vec<f64>,
    jump: JumpPolicy,
    handlers: Handlers,
}

impl FetcherBuilder {
    pub fn new(begin: i64) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            begin,
            end: None,
            step: 1,
            weights: vec![1.0],
            jump: JumpPolicy::default(),
            handlers: Handlers::new(),
        }
    }

    /// Last index, inclusive; without it the range is unbounded
    pub fn end(mut self, end: i64) -> Self {
        self.end = Some(end);
        self
    }

    pub fn end_opt(mut self, end: Option<i64>) -> Self {
        self.end = end;
        self
    }

    pub fn step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }

    /// Relative share of the range per job; normalized on build
    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = weights;
        self
    }

    /// Equal weights for `count` jobs
    pub fn workers(mut self, count: usize) -> Self {
        self.weights = vec![1.0; count];
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn jump(mut self, jump: JumpPolicy) -> Self {
        self.jump = jump;
        self
    }

    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: ProbeHandler + 'static,
    {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<IndexFetcher> {
        let span = StepSpan::new(self.begin, self.end, self.step)?;
        let weights = split::normalize_weights(&self.weights)?;

        Ok(IndexFetcher {
            name: self.name,
            span,
            weights,
            jump: self.jump,
            handlers: RwLock::new(self.handlers),
            job_listeners: RwLock::new(Vec::new()),
            events: Arc::new(EventBus::new()),
            flags: FlagGroup::new(task_vocabulary(), PENDING)?,
            jobs: RwLock::new(Vec::new()),
            run: Mutex::new(None),
        })
    }
}

impl IndexFetcher {
    pub fn builder(begin: i64) -> FetcherBuilder {
        FetcherBuilder::new(begin)
    }

    /// Shorthand for a builder with range and weights
    pub fn new(begin: i64, end: Option<i64>, step: i64, weights: Vec<f64>) -> Result<Self> {
        FetcherBuilder::new(begin)
            .end_opt(end)
            .step(step)
            .weights(weights)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &StepSpan {
        &self.span
    }

    /// Normalized weights, summing to 1
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn flags(&self) -> &FlagGroup {
        &self.flags
    }

    pub fn events(&self) -> &EventBus<FetcherEvent> {
        &self.events
    }

    /// Register a handler for jobs created by later starts
    pub fn add_handler<H>(&self, handler: H)
    where
        H: ProbeHandler + 'static,
    {
        self.handlers.write().push(handler);
    }

    /// Attach a listener to the event channel of every job created later
    pub fn on_job_event<F>(&self, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.job_listeners.write().push(Arc::new(listener));
    }

    /// Chunks the next start would create
    pub fn plan(&self) -> Result<Vec<StepSpan>> {
        Ok(split::plan(&self.span, &self.weights)?)
    }

    /// Jobs of the most recent start
    pub fn jobs(&self) -> Vec<Arc<IndexJob>> {
        self.jobs.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.flags.has(RUNNING)
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.has(STOPPING)
    }

    /// True once every job of the current start has exited
    pub fn is_finished(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .map_or(true, |run| run.workers.iter().all(JobWorker::is_finished))
    }

    /// Create one job per chunk and start a worker thread for each
    ///
    /// Jobs from a previous start are discarded.
    pub fn start(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(FetcherError::AlreadyStopped {
                name: self.name.clone(),
            });
        }

        let mut run = self.run.lock();
        if let Some(active) = run.as_ref() {
            let alive = active.workers.iter().filter(|w| !w.is_finished()).count();
            if alive > 0 {
                return Err(FetcherError::AlreadyRunning {
                    name: self.name.clone(),
                    jobs: alive,
                });
            }
        }

        let handlers = self.handlers.read().clone();
        let listeners = self.job_listeners.read().clone();
        let mut jobs = Vec::new();
        for chunk in split::plan(&self.span, &self.weights)? {
            let job = IndexJob::from_span(chunk)?
                .with_jump(self.jump)
                .with_handlers(handlers.clone());
            for listener in &listeners {
                job.events().listen_shared(Arc::clone(listener));
            }
            jobs.push(Arc::new(job));
        }
        *self.jobs.write() = jobs.clone();

        if self.flags.has(PENDING) {
            self.flags.replace(PENDING, RUNNING)?;
        }

        self.events.publish(FetcherEvent::Started {
            jobs: jobs.iter().map(|j| j.id()).collect(),
        });

        let (done_tx, done_rx) = unbounded();
        let active = run.insert(Run {
            workers: Vec::with_capacity(jobs.len()),
            done: done_rx,
            first_error: None,
        });
        for (i, job) in jobs.iter().enumerate() {
            let worker = JobWorker::spawn(
                format!("{}-{}", self.name, i),
                Arc::clone(job),
                done_tx.clone(),
                Arc::clone(&self.events),
            )?;
            active.workers.push(worker);
        }

        info!(
            fetcher = %self.name,
            span = %self.span,
            jobs = jobs.len(),
            "Fetcher started"
        );
        Ok(())
    }

    /// Wait for the jobs of the current start, in completion order
    ///
    /// Returns the first job error encountered. With a timeout, returns
    /// [`FetcherError::Timeout`] if jobs are still running at the deadline;
    /// a later call picks up where this one stopped.
    pub fn join(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            // The receiver is cloned so the lock is not held while blocked
            let done = match self.run.lock().as_ref() {
                Some(run) if run.pending() > 0 => run.done.clone(),
                Some(_) => break,
                None => return Ok(()),
            };

            let received = match deadline {
                Some(deadline) => done.recv_deadline(deadline),
                None => done.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let id = match received {
                Ok(id) => id,
                Err(RecvTimeoutError::Timeout) => {
                    let pending = self.run.lock().as_ref().map_or(0, Run::pending);
                    return Err(FetcherError::Timeout { pending });
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let mut guard = self.run.lock();
            let Some(run) = guard.as_mut() else {
                return Ok(());
            };
            let Some(worker) = run.workers.iter_mut().find(|w| w.job().id() == id) else {
                continue;
            };
            if let Err(e) = worker.join() {
                debug!(fetcher = %self.name, job = %id, error = %e, "Job failed");
                run.first_error.get_or_insert(e);
            }
        }

        match self.run.lock().as_ref().and_then(|run| run.first_error.clone()) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Cancel every job, wait for them, and enter the stopping state
    pub fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }

        for job in self.jobs.read().iter() {
            job.cancel()?;
        }

        let joined = self.join(timeout);
        if let Err(FetcherError::Timeout { .. }) = joined {
            return joined;
        }

        self.flags.replace([PENDING, RUNNING], STOPPING)?;
        info!(fetcher = %self.name, "Fetcher stopped");
        self.events.publish(FetcherEvent::Stopped);
        joined
    }

    /// Probe counts summed over the current jobs
    pub fn summary(&self) -> FetchSummary {
        self.jobs
            .read()
            .iter()
            .fold(FetchSummary::default(), |mut summary, job| {
                let stats = job.stats();
                summary.jobs += 1;
                summary.stopped_jobs += usize::from(job.is_stopped());
                summary.probes += stats.probes();
                summary.accepted += stats.accepted();
                summary.skipped += stats.skipped();
                summary.errors += stats.errors();
                summary
            })
    }
}

impl std::fmt::Debug for IndexFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexFetcher")
            .field("name", &self.name)
            .field("span", &self.span)
            .field("weights", &self.weights)
            .field("flags", &self.flags.labels())
            .finish()
    }
}
