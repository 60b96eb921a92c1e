//! Per-job samples
//!
//! A [`JobSample`] is created the first time the monitor sees a job. It
//! counts probes through a listener on the job's event channel and keeps a
//! rolling window of `processed` snapshots, one per tick, from which the
//! remaining time is extrapolated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::job::{IndexJob, JobEvent, JobId};

/// Snapshots kept per job
pub const WINDOW_CAPACITY: usize = 60;

/// Estimated time to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eta {
    /// Not enough progress to extrapolate
    Unbounded,
    Finite(Duration),
}

impl Eta {
    /// The later of two estimates; unbounded wins
    pub fn max(self, other: Eta) -> Eta {
        match (self, other) {
            (Eta::Finite(a), Eta::Finite(b)) => Eta::Finite(a.max(b)),
            _ => Eta::Unbounded,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Eta::Finite(d) => Some(*d),
            Eta::Unbounded => None,
        }
    }
}

impl Serialize for Eta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Eta::Unbounded => serializer.serialize_str("unbounded"),
            Eta::Finite(d) => serializer.serialize_f64(d.as_secs_f64()),
        }
    }
}

#[derive(Debug, Default)]
struct ProbeCounters {
    total: AtomicU64,
    accepted: AtomicU64,
}

/// Monitor-side view of one job
#[derive(Debug)]
pub struct JobSample {
    job: Arc<IndexJob>,
    tick: Duration,
    started: Instant,
    started_at: String,
    ended: Mutex<Option<Instant>>,
    counters: Arc<ProbeCounters>,
    window: Mutex<VecDeque<f64>>,
}

/// Serializable snapshot of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: JobId,
    pub flags: String,
    pub begin: i64,
    pub end: i64,
    pub step: i64,
    pub current: Option<i64>,
    pub started_at: String,
    pub age_secs: f64,
    pub processed: Option<f64>,
    pub average_speed: Option<f64>,
    pub effective_average_speed: Option<f64>,
    pub remaining_time: Option<Eta>,
    pub total_probes: u64,
    pub accepted_probes: u64,
}

impl JobSample {
    /// Start sampling `job`, counting its probes from now on
    pub(crate) fn attach(job: Arc<IndexJob>, tick: Duration) -> Self {
        let counters = Arc::new(ProbeCounters::default());
        let listener = Arc::clone(&counters);
        job.events().listen(move |event| match event {
            JobEvent::Probing { .. } => {
                listener.total.fetch_add(1, Ordering::Relaxed);
            }
            JobEvent::Probed { .. } => {
                listener.accepted.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        });

        Self {
            job,
            tick,
            started: Instant::now(),
            started_at: Utc::now().to_rfc3339(),
            ended: Mutex::new(None),
            counters,
            window: Mutex::new(VecDeque::with_capacity(WINDOW_CAPACITY)),
        }
    }

    pub fn job(&self) -> &Arc<IndexJob> {
        &self.job
    }

    pub fn total_probes(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }

    pub fn accepted_probes(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }

    /// Record a `processed` snapshot, evicting the oldest when full
    pub(crate) fn push(&self, processed: f64) {
        let mut window = self.window.lock();
        if window.len() == WINDOW_CAPACITY {
            window.pop_front();
        }
        window.push_back(processed);
    }

    /// Record the end time the first time a stopped job is seen
    pub(crate) fn mark_ended(&self) {
        self.ended.lock().get_or_insert_with(Instant::now);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.lock().is_some()
    }

    /// Copy of the rolling window, oldest first
    pub fn window(&self) -> Vec<f64> {
        self.window.lock().iter().copied().collect()
    }

    /// Time from first sight to the end time, or to now
    pub fn age(&self) -> Duration {
        match *self.ended.lock() {
            Some(ended) => ended.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    pub fn processed(&self) -> Option<f64> {
        self.job.is_running().then(|| self.job.processed())
    }

    /// Probes per second since first sight
    pub fn average_speed(&self) -> Option<f64> {
        self.job
            .is_running()
            .then(|| per_second(self.total_probes(), self.age()))
    }

    /// Accepted probes per second since first sight
    pub fn effective_average_speed(&self) -> Option<f64> {
        self.job
            .is_running()
            .then(|| per_second(self.accepted_probes(), self.age()))
    }

    /// Extrapolate from the mean per-tick change of `processed`
    pub fn remaining_time(&self) -> Option<Eta> {
        if !self.job.is_running() {
            return None;
        }
        Some(estimate_remaining(&self.window(), self.job.processed(), self.tick))
    }

    pub fn report(&self) -> JobReport {
        let span = self.job.span();
        JobReport {
            job: self.job.id(),
            flags: self.job.flags().to_string(),
            begin: span.begin(),
            end: span.end(),
            step: span.step(),
            current: self.job.current(),
            started_at: self.started_at.clone(),
            age_secs: self.age().as_secs_f64(),
            processed: self.processed(),
            average_speed: self.average_speed(),
            effective_average_speed: self.effective_average_speed(),
            remaining_time: self.remaining_time(),
            total_probes: self.total_probes(),
            accepted_probes: self.accepted_probes(),
        }
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs < 1.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

fn estimate_remaining(window: &[f64], processed: f64, tick: Duration) -> Eta {
    if window.len() < 2 {
        return Eta::Unbounded;
    }
    let deltas = window.windows(2).map(|pair| pair[1] - pair[0]);
    let mean = deltas.sum::<f64>() / (window.len() - 1) as f64;
    if mean <= 0.0 {
        return Eta::Unbounded;
    }

    let ticks = (1.0 - processed).max(0.0) / mean;
    match Duration::try_from_secs_f64(ticks * tick.as_secs_f64()) {
        Ok(remaining) => Eta::Finite(remaining),
        Err(_) => Eta::Unbounded,
    }
}
