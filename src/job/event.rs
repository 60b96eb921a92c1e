//! Event channels
//!
//! Every job and every fetcher owns an [`EventBus`]. Consumers either
//! register a synchronous listener, which runs on the publishing thread in
//! publish order, or subscribe to an unbounded crossbeam channel and drain
//! it from their own thread. Events of one job are published by the job's
//! thread only, so they are totally ordered per job.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use super::{JobId, JobOutcome, Phase};

/// Synchronous event callback
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Events published by an index job
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The job left `pending` and starts probing
    Running { job: JobId },
    /// The traversal changed phase
    PhaseSwitch {
        job: JobId,
        phase: Phase,
        reverse: bool,
    },
    /// A probe is about to run
    Probing { job: JobId, index: i64 },
    /// The index was accepted
    Probed { job: JobId, index: i64 },
    /// A handler rejected the index
    Skipped {
        job: JobId,
        index: i64,
        reason: String,
    },
    /// A handler failed; the index counts as rejected
    UnexpectedError {
        job: JobId,
        index: i64,
        error: String,
    },
    /// The job reached a stopping state
    Stopped { job: JobId, outcome: StopReason },
}

impl JobEvent {
    pub fn job(&self) -> JobId {
        match self {
            JobEvent::Running { job }
            | JobEvent::PhaseSwitch { job, .. }
            | JobEvent::Probing { job, .. }
            | JobEvent::Probed { job, .. }
            | JobEvent::Skipped { job, .. }
            | JobEvent::UnexpectedError { job, .. }
            | JobEvent::Stopped { job, .. } => *job,
        }
    }

    /// Index the event refers to, for per-probe events
    pub fn index(&self) -> Option<i64> {
        match self {
            JobEvent::Probing { index, .. }
            | JobEvent::Probed { index, .. }
            | JobEvent::Skipped { index, .. }
            | JobEvent::UnexpectedError { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Why a job stopped, as carried by [`JobEvent::Stopped`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Canceled,
    Failed(String),
}

impl From<&JobOutcome> for StopReason {
    fn from(outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Completed => StopReason::Completed,
            JobOutcome::Canceled => StopReason::Canceled,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => f.write_str("completed"),
            StopReason::Canceled => f.write_str("canceled"),
            StopReason::Failed(error) => write!(f, "failed: {}", error),
        }
    }
}

/// Publish/subscribe channel for one event producer
pub struct EventBus<E> {
    listeners: RwLock<Vec<Listener<E>>>,
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `listener` on the publishing thread for every event
    pub fn listen<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    pub fn listen_shared(&self, listener: Listener<E>) {
        self.listeners.write().push(listener);
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: E) {
        let listeners: Vec<Listener<E>> = self.listeners.read().clone();
        for listener in &listeners {
            listener(&event);
        }

        // Dropped receivers are pruned on the next publish
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}
