//! Progress, throughput and ETA monitoring
//!
//! The monitor runs its own thread and ticks at a fixed interval:
//!
//! ```text
//!   every tick, for each job of each watched source:
//!     unseen job   -> new JobSample (start = now), count its probes
//!     running job  -> push job.processed() into the sample window
//!     stopped job  -> record the end time once
//! ```
//!
//! Aggregates only consider running jobs: progress and speeds are means,
//! the remaining time is the slowest job's estimate. Between ticks the
//! thread waits on its own `canceling` flag, so `stop()` returns promptly.

mod sample;

pub use sample::{Eta, JobReport, JobSample, WINDOW_CAPACITY};

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::{FetcherError, FlagResult, Result};
use crate::fetcher::IndexFetcher;
use crate::flag::builtin::{
    CANCELING, PENDING, RUNNING, STOPPING, STOPPING_WITH_CANCELED, STOPPING_WITH_EXCEPTION,
};
use crate::flag::{task_vocabulary, FlagGroup};
use crate::job::{IndexJob, JobId};

/// Default interval between samples
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Anything that owns index jobs the monitor can sample
pub trait JobSource: Send + Sync {
    fn jobs(&self) -> Vec<Arc<IndexJob>>;
}

impl JobSource for IndexFetcher {
    fn jobs(&self) -> Vec<Arc<IndexJob>> {
        IndexFetcher::jobs(self)
    }
}

/// Serializable snapshot of the monitor and every sampled job
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub flags: String,
    pub age_secs: f64,
    pub running_jobs: usize,
    pub processed: Option<f64>,
    pub average_speed: Option<f64>,
    pub effective_average_speed: Option<f64>,
    pub remaining_time: Option<Eta>,
    pub total_probes: u64,
    pub accepted_probes: u64,
    pub jobs: Vec<JobReport>,
}

struct Shared {
    tick: Duration,
    flags: FlagGroup,
    sources: RwLock<Vec<Arc<dyn JobSource>>>,
    samples: RwLock<HashMap<JobId, Arc<JobSample>>>,
    started: Mutex<Option<Instant>>,
    ended: Mutex<Option<Instant>>,
    error: Mutex<Option<String>>,
}

/// Background sampler of job progress
pub struct Monitor {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(tick: Duration) -> FlagResult<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                tick,
                flags: FlagGroup::new(task_vocabulary(), PENDING)?,
                sources: RwLock::new(Vec::new()),
                samples: RwLock::new(HashMap::new()),
                started: Mutex::new(None),
                ended: Mutex::new(None),
                error: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        })
    }

    pub fn tick_interval(&self) -> Duration {
        self.shared.tick
    }

    pub fn flags(&self) -> &FlagGroup {
        &self.shared.flags
    }

    /// Add a source whose jobs are sampled from the next tick on
    pub fn watch(&self, source: Arc<dyn JobSource>) {
        self.shared.sources.write().push(source);
    }

    /// Sample every watched job once
    pub fn tick(&self) {
        self.shared.tick_once();
    }

    /// Spawn the sampling thread
    pub fn start(&self) -> Result<()> {
        let flags = &self.shared.flags;
        if flags.has(STOPPING) {
            return Err(FetcherError::AlreadyStopped {
                name: "monitor".into(),
            });
        }
        if flags.has(RUNNING) {
            return Ok(());
        }
        flags.replace(PENDING, RUNNING)?;
        *self.shared.started.lock() = Some(Instant::now());

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("monitor".into())
            .spawn(move || monitor_loop(shared))?;
        *self.thread.lock() = Some(handle);

        info!(tick_ms = self.shared.tick.as_millis() as u64, "Monitor started");
        Ok(())
    }

    /// Ask the sampling thread to exit and wait for it
    pub fn stop(&self) -> Result<()> {
        let flags = &self.shared.flags;
        if flags.has(RUNNING) {
            flags.replace(RUNNING, CANCELING)?;
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("Monitor thread panicked");
            }
        }
        if flags.has(PENDING) {
            flags.replace(PENDING, STOPPING)?;
        }
        self.shared.ended.lock().get_or_insert_with(Instant::now);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.flags.has(RUNNING)
    }

    /// Error that ended the sampling thread, if any; cleared by the call
    pub fn take_error(&self) -> Option<String> {
        self.shared.error.lock().take()
    }

    /// Time since start, up to the end time once stopped
    pub fn age(&self) -> Duration {
        let Some(started) = *self.shared.started.lock() else {
            return Duration::ZERO;
        };
        match *self.shared.ended.lock() {
            Some(ended) => ended.duration_since(started),
            None => started.elapsed(),
        }
    }

    /// Samples ordered by job id
    pub fn samples(&self) -> Vec<Arc<JobSample>> {
        let mut samples: Vec<Arc<JobSample>> =
            self.shared.samples.read().values().cloned().collect();
        samples.sort_by_key(|s| s.job().id());
        samples
    }

    pub fn sample(&self, job: JobId) -> Option<Arc<JobSample>> {
        self.shared.samples.read().get(&job).cloned()
    }

    fn running(&self) -> Vec<Arc<JobSample>> {
        self.samples()
            .into_iter()
            .filter(|s| s.job().is_running())
            .collect()
    }

    /// Mean progress of the running jobs
    pub fn processed(&self) -> Option<f64> {
        mean(self.running().iter().filter_map(|s| s.processed()))
    }

    /// Mean probe rate of the running jobs
    pub fn average_speed(&self) -> Option<f64> {
        mean(self.running().iter().filter_map(|s| s.average_speed()))
    }

    /// Mean accepted-probe rate of the running jobs
    pub fn effective_average_speed(&self) -> Option<f64> {
        mean(self.running().iter().filter_map(|s| s.effective_average_speed()))
    }

    /// Slowest estimate among the running jobs
    pub fn remaining_time(&self) -> Option<Eta> {
        self.running()
            .iter()
            .filter_map(|s| s.remaining_time())
            .reduce(Eta::max)
    }

    pub fn report(&self) -> MonitorReport {
        let jobs: Vec<JobReport> = self.samples().iter().map(|s| s.report()).collect();
        MonitorReport {
            flags: self.shared.flags.to_string(),
            age_secs: self.age().as_secs_f64(),
            running_jobs: self.running().len(),
            processed: self.processed(),
            average_speed: self.average_speed(),
            effective_average_speed: self.effective_average_speed(),
            remaining_time: self.remaining_time(),
            total_probes: jobs.iter().map(|j| j.total_probes).sum(),
            accepted_probes: jobs.iter().map(|j| j.accepted_probes).sum(),
            jobs,
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!(error = %e, "Monitor stop on drop failed");
        }
    }
}

impl Shared {
    fn tick_once(&self) {
        let sources = self.sources.read().clone();
        for job in sources.iter().flat_map(|s| s.jobs()) {
            let known = self.samples.read().get(&job.id()).cloned();
            match known {
                None => {
                    debug!(job = %job.id(), "Sampling new job");
                    let sample = JobSample::attach(Arc::clone(&job), self.tick);
                    self.samples.write().insert(job.id(), Arc::new(sample));
                }
                Some(sample) if job.is_running() => sample.push(job.processed()),
                Some(sample) if job.is_stopped() => sample.mark_ended(),
                Some(_) => {}
            }
        }
    }
}

fn monitor_loop(shared: Arc<Shared>) {
    loop {
        shared.tick_once();
        match shared.flags.wait(CANCELING, Some(shared.tick)) {
            Ok(false) => continue,
            Ok(true) => break,
            Err(e) => {
                error!(error = %e, "Monitor failed");
                *shared.error.lock() = Some(e.to_string());
                if let Err(e) = shared.flags.replace(RUNNING, STOPPING_WITH_EXCEPTION) {
                    error!(error = %e, "Monitor could not enter stopping state");
                }
                return;
            }
        }
    }

    if let Err(e) = shared.flags.replace(CANCELING, STOPPING_WITH_CANCELED) {
        error!(error = %e, "Monitor could not enter stopping state");
    }
    *shared.ended.lock() = Some(Instant::now());
    info!("Monitor stopped");
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}
