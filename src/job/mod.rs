//! Index jobs
//!
//! An [`IndexJob`] probes one contiguous range on the thread that calls
//! [`IndexJob::run`]. Handlers decide per index; events report each probe.

mod event;
mod handler;
mod index_job;
mod jump;

pub use event::{EventBus, JobEvent, Listener, StopReason};
pub use handler::{Handlers, ProbeHandler};
pub use index_job::{IndexJob, JobStats, Phase};
pub use jump::{JumpOffsets, JumpPolicy, DEFAULT_BASE, DEFAULT_REPEAT};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(id: u64) -> Self {
        JobId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a job ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The range was exhausted
    Completed,
    /// The job observed a cancel request
    Canceled,
}
