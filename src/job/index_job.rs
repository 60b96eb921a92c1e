//! Adaptive traversal of one contiguous index range
//!
//! ```text
//!            rejected                 accepted
//!  ┌────────┐ ───────► ┌─────────┐ ─────────────► ┌─────────────────┐
//!  │stepping│          │ leaping │  save breakpoint│ leaping+reverse │
//!  └────────┘ ◄─────── └─────────┘                 └─────────────────┘
//!      ▲   restore         │ exhausted                 │        │
//!      │   breakpoint      ▼                  accepted │        │ exhausted
//!      │               (job ends)                      ▼        │
//!      │                                  ┌──────────────────┐  │
//!      └──────────────────────────────────│ stepping+reverse │◄─┘ restore
//!                 reverse bound crossed   └──────────────────┘
//! ```
//!
//! Stepping walks the range one step at a time. The first rejection starts
//! a leap: probes at cumulative, growing offsets until something is
//! accepted. The region jumped over is then backfilled in reverse, bounded
//! by the first rejected index, before stepping resumes just past the
//! breakpoint where the leap landed.
//!
//! The breakpoint and the active span live in a [`Traversal`] owned by the
//! thread inside [`IndexJob::run`]; other threads only see the job's flags,
//! current index and worked span.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use super::event::{EventBus, JobEvent, StopReason};
use super::handler::{Handlers, ProbeHandler};
use super::jump::JumpPolicy;
use super::{JobId, JobOutcome};
use crate::error::{
    panic_message, FlagError, FlagResult, JobError, JobResult, ProbeError, ProbeOutcome,
};
use crate::flag::builtin::{
    CANCELING, LEAPING, PENDING, REVERSE, RUNNING, STEPPING, STOPPING, STOPPING_WITH_CANCELED,
    STOPPING_WITH_EXCEPTION,
};
use crate::flag::{job_step_vocabulary, FlagGroup};
use crate::span::{StepSpan, WorkedSpan};

/// Traversal phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stepping,
    Leaping,
}

impl Phase {
    fn flag(self) -> &'static str {
        match self {
            Phase::Stepping => STEPPING,
            Phase::Leaping => LEAPING,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// Probe counters for one job
#[derive(Debug, Default)]
pub struct JobStats {
    /// Handler invocations
    pub probes: AtomicU64,

    /// Accepted indices
    pub accepted: AtomicU64,

    /// Indices a handler skipped
    pub skipped: AtomicU64,

    /// Unexpected handler failures
    pub errors: AtomicU64,
}

impl JobStats {
    fn record(&self, outcome: &ProbeOutcome) {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ProbeOutcome::Accepted { .. } => &self.accepted,
            ProbeOutcome::Skipped { .. } => &self.skipped,
            ProbeOutcome::Failed { .. } => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Position {
    current: Option<i64>,
    worked: WorkedSpan,
}

/// One adaptive traversal over a contiguous index range
pub struct IndexJob {
    id: JobId,
    span: StepSpan,
    jump: JumpPolicy,
    handlers: Handlers,
    flags: FlagGroup,
    events: EventBus<JobEvent>,
    position: Mutex<Position>,
    stats: JobStats,
    started: AtomicBool,
}

/// Why the traversal loop ended
#[derive(Debug)]
enum Interrupt {
    Exhausted,
    Canceled,
    Stopped { index: i64, reason: String },
    Flag(FlagError),
    Panicked(String),
}

#[derive(Debug, Clone, Copy)]
struct Breakpoint {
    span: StepSpan,
    current: i64,
}

/// State owned by the running traversal
#[derive(Debug)]
struct Traversal {
    span: StepSpan,
    current: i64,
    phase: Phase,
    reverse: bool,
    breakpoint: Option<Breakpoint>,
    first_unaccepted: Option<i64>,
}

impl IndexJob {
    /// Create a pending job over `begin..=end`; `end = None` is unbounded
    pub fn new(begin: i64, end: Option<i64>, step: i64) -> crate::error::Result<Self> {
        let span = StepSpan::new(begin, end, step)?;
        Ok(Self::from_span(span)?)
    }

    /// Create a pending job over an already validated span
    pub fn from_span(span: StepSpan) -> FlagResult<Self> {
        Ok(Self {
            id: JobId::next(),
            span,
            jump: JumpPolicy::default(),
            handlers: Handlers::new(),
            flags: FlagGroup::new(job_step_vocabulary(), PENDING)?,
            events: EventBus::new(),
            position: Mutex::new(Position::default()),
            stats: JobStats::default(),
            started: AtomicBool::new(false),
        })
    }

    pub fn with_jump(mut self, jump: JumpPolicy) -> Self {
        self.jump = jump;
        self
    }

    pub fn with_handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn add_handler<H>(&mut self, handler: H)
    where
        H: ProbeHandler + 'static,
    {
        self.handlers.push(handler);
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn span(&self) -> &StepSpan {
        &self.span
    }

    pub fn flags(&self) -> &FlagGroup {
        &self.flags
    }

    pub fn events(&self) -> &EventBus<JobEvent> {
        &self.events
    }

    pub fn stats(&self) -> &JobStats {
        &self.stats
    }

    /// Index most recently probed, if any
    pub fn current(&self) -> Option<i64> {
        self.position.lock().current
    }

    pub fn worked_span(&self) -> WorkedSpan {
        self.position.lock().worked
    }

    /// Fraction of the range covered by the worked span, in `[0, 1]`
    ///
    /// This ignores the step and any unvisited holes inside the worked span.
    pub fn processed(&self) -> f64 {
        self.position.lock().worked.fraction_of(&self.span)
    }

    pub fn is_running(&self) -> bool {
        self.flags.has(RUNNING)
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.has(STOPPING)
    }

    /// Ask the job to stop at the next probe boundary
    pub fn cancel(&self) -> FlagResult<()> {
        if self.flags.any([STOPPING, CANCELING]) {
            return Ok(());
        }
        match self.flags.replace([PENDING, RUNNING], CANCELING) {
            Ok(()) => {
                info!(job = %self.id, "Cancel requested");
                Ok(())
            }
            // The job finished between the check and the transition
            Err(_) if self.flags.any([STOPPING, CANCELING]) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Drive the traversal to completion on the calling thread
    pub fn run(&self) -> JobResult<JobOutcome> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(if self.is_stopped() {
                JobError::AlreadyStopped { job: self.id }
            } else {
                JobError::AlreadyRunning { job: self.id }
            });
        }

        let interrupt = match self.flags.replace(PENDING, [RUNNING, STEPPING]) {
            Ok(()) => {
                info!(job = %self.id, span = %self.span, "Job starting");
                // Listeners run on this thread; a panic in one must still end the job
                panic::catch_unwind(AssertUnwindSafe(|| {
                    self.events.publish(JobEvent::Running { job: self.id });
                    self.traverse()
                }))
                .unwrap_or_else(|payload| Interrupt::Panicked(panic_message(payload.as_ref())))
            }
            Err(e) => self.flag_interrupt(e),
        };

        self.finish(interrupt)
    }

    fn traverse(&self) -> Interrupt {
        let mut t = Traversal {
            span: self.span,
            current: self.span.begin(),
            phase: Phase::Stepping,
            reverse: false,
            breakpoint: None,
            first_unaccepted: None,
        };

        loop {
            let result = match t.phase {
                Phase::Stepping => self.stepping(&mut t),
                Phase::Leaping => self.leaping(&mut t),
            };
            if let Err(interrupt) = result {
                return interrupt;
            }
        }
    }

    fn stepping(&self, t: &mut Traversal) -> Result<(), Interrupt> {
        match self.step(t) {
            Ok(()) => self.start_leap(t),
            Err(Interrupt::Exhausted) if t.reverse => self.restore_breakpoint(t),
            Err(interrupt) => Err(interrupt),
        }
    }

    fn leaping(&self, t: &mut Traversal) -> Result<(), Interrupt> {
        match self.leap(t) {
            Ok(()) if t.reverse => self.start_reverse_stepping(t),
            Ok(()) => self.start_reverse_leap(t),
            Err(Interrupt::Exhausted) if t.reverse => self.restore_breakpoint(t),
            Err(interrupt) => Err(interrupt),
        }
    }

    /// Probe `current, current+step, …`
    ///
    /// Returns `Ok` on the first rejection while moving forward. Reverse
    /// stepping passes over rejections and only ends at the span bound.
    fn step(&self, t: &mut Traversal) -> Result<(), Interrupt> {
        loop {
            let index = t.current;
            self.visit(t, index)?;
            let accepted = self.probe(index)?;
            if t.span.step() == 0 {
                return Err(Interrupt::Exhausted);
            }
            if !accepted && !t.reverse {
                return Ok(());
            }
            t.current = index
                .checked_add(t.span.step())
                .ok_or(Interrupt::Exhausted)?;
        }
    }

    /// Probe at cumulative jump offsets from `current` until one is accepted
    fn leap(&self, t: &mut Traversal) -> Result<(), Interrupt> {
        let direction = t.span.step().signum();
        let mut index = t.current;
        for offset in self.jump.offsets() {
            index = offset
                .checked_mul(direction)
                .and_then(|d| index.checked_add(d))
                .ok_or(Interrupt::Exhausted)?;
            self.visit(t, index)?;
            if self.probe(index)? {
                return Ok(());
            }
        }
        Err(Interrupt::Exhausted)
    }

    fn start_leap(&self, t: &mut Traversal) -> Result<(), Interrupt> {
        t.first_unaccepted = Some(t.current);
        t.phase = Phase::Leaping;
        self.enter_phase(t)
    }

    fn start_reverse_leap(&self, t: &mut Traversal) -> Result<(), Interrupt> {
        let first_unaccepted = t.first_unaccepted.ok_or(Interrupt::Exhausted)?;
        t.breakpoint = Some(Breakpoint {
            span: t.span,
            current: t.current,
        });
        t.span = t.span.reversed_between(t.current, first_unaccepted);
        t.reverse = true;
        self.enter_phase(t)
    }

    fn start_reverse_stepping(&self, t: &mut Traversal) -> Result<(), Interrupt> {
        let Some(next) = t.current.checked_add(t.span.step()) else {
            return self.restore_breakpoint(t);
        };
        t.current = next;
        t.phase = Phase::Stepping;
        self.enter_phase(t)
    }

    /// Leave reverse mode and resume stepping just past the breakpoint
    fn restore_breakpoint(&self, t: &mut Traversal) -> Result<(), Interrupt> {
        let breakpoint = t.breakpoint.take().ok_or(Interrupt::Exhausted)?;
        t.span = breakpoint.span;
        t.reverse = false;
        t.first_unaccepted = None;
        t.phase = Phase::Stepping;
        t.current = breakpoint
            .current
            .checked_add(t.span.step())
            .ok_or(Interrupt::Exhausted)?;
        self.enter_phase(t)
    }

    fn enter_phase(&self, t: &Traversal) -> Result<(), Interrupt> {
        let mut flags = vec![t.phase.flag()];
        if t.reverse {
            flags.push(REVERSE);
        }
        self.flags
            .replace([STEPPING, LEAPING, REVERSE], flags)
            .map_err(|e| self.flag_interrupt(e))?;

        debug!(
            job = %self.id,
            phase = %t.phase,
            reverse = t.reverse,
            current = t.current,
            "Phase switch"
        );
        self.events.publish(JobEvent::PhaseSwitch {
            job: self.id,
            phase: t.phase,
            reverse: t.reverse,
        });
        Ok(())
    }

    /// Make `index` current if it lies within the active span
    fn visit(&self, t: &mut Traversal, index: i64) -> Result<(), Interrupt> {
        if self.flags.has(CANCELING) {
            return Err(Interrupt::Canceled);
        }
        if !t.span.contains(index) {
            return Err(Interrupt::Exhausted);
        }
        t.current = index;

        let mut position = self.position.lock();
        position.current = Some(index);
        position.worked.extend(index);
        Ok(())
    }

    /// Run the handlers once; `Ok(true)` if the index was accepted
    fn probe(&self, index: i64) -> Result<bool, Interrupt> {
        self.events.publish(JobEvent::Probing { job: self.id, index });

        let dispatched = panic::catch_unwind(AssertUnwindSafe(|| self.handlers.dispatch(index)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                Err(ProbeError::failed(format!("handler panicked: {message}")))
            });
        let outcome = match dispatched {
            Ok(()) => ProbeOutcome::Accepted { index },
            Err(ProbeError::Skip(reason)) => ProbeOutcome::Skipped { index, reason },
            Err(ProbeError::Failed(error)) => ProbeOutcome::Failed {
                index,
                error: error.to_string(),
            },
            Err(ProbeError::Stop(reason)) => {
                self.stats.probes.fetch_add(1, Ordering::Relaxed);
                warn!(job = %self.id, index, reason = %reason, "Handler requested stop");
                return Err(Interrupt::Stopped { index, reason });
            }
        };
        self.stats.record(&outcome);

        let job = self.id;
        let event = match &outcome {
            ProbeOutcome::Accepted { .. } => {
                trace!(job = %job, index, "Index accepted");
                JobEvent::Probed { job, index }
            }
            ProbeOutcome::Skipped { reason, .. } => {
                trace!(job = %job, index, reason = %reason, "Index skipped");
                JobEvent::Skipped {
                    job,
                    index,
                    reason: reason.clone(),
                }
            }
            ProbeOutcome::Failed { error, .. } => {
                warn!(job = %job, index, error = %error, "Handler failed");
                JobEvent::UnexpectedError {
                    job,
                    index,
                    error: error.clone(),
                }
            }
        };
        self.events.publish(event);
        Ok(outcome.is_accepted())
    }

    fn flag_interrupt(&self, error: FlagError) -> Interrupt {
        if self.flags.has(CANCELING) {
            Interrupt::Canceled
        } else {
            Interrupt::Flag(error)
        }
    }

    fn finish(&self, interrupt: Interrupt) -> JobResult<JobOutcome> {
        let (terminal, result) = match interrupt {
            Interrupt::Exhausted => (STOPPING, Ok(JobOutcome::Completed)),
            Interrupt::Canceled => (STOPPING_WITH_CANCELED, Ok(JobOutcome::Canceled)),
            Interrupt::Stopped { index, reason } => (
                STOPPING_WITH_EXCEPTION,
                Err(JobError::Stopped {
                    job: self.id,
                    index,
                    reason,
                }),
            ),
            Interrupt::Flag(source) => (
                STOPPING_WITH_EXCEPTION,
                Err(JobError::Flag {
                    job: self.id,
                    source,
                }),
            ),
            Interrupt::Panicked(message) => {
                error!(job = %self.id, message = %message, "Job panicked");
                (
                    STOPPING_WITH_EXCEPTION,
                    Err(JobError::Panicked {
                        job: self.id,
                        message,
                    }),
                )
            }
        };

        if let Err(e) = self.flags.replace([PENDING, RUNNING, CANCELING], terminal) {
            error!(job = %self.id, error = %e, "Failed to enter stopping state");
        }

        let reason = match &result {
            Ok(outcome) => StopReason::from(outcome),
            Err(e) => StopReason::Failed(e.to_string()),
        };
        info!(
            job = %self.id,
            outcome = %reason,
            probes = self.stats.probes(),
            accepted = self.stats.accepted(),
            "Job stopped"
        );
        self.events.publish(JobEvent::Stopped {
            job: self.id,
            outcome: reason,
        });
        result
    }
}

impl fmt::Debug for IndexJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexJob")
            .field("id", &self.id)
            .field("span", &self.span)
            .field("flags", &self.flags.labels())
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Run a job rejecting `rejected` and return accepted indices in order
    fn accepted(begin: i64, end: i64, step: i64, rejected: &[i64]) -> Vec<i64> {
        let rejected: HashSet<i64> = rejected.iter().copied().collect();
        let mut job = IndexJob::new(begin, Some(end), step).unwrap();
        job.add_handler(move |i: i64| {
            if rejected.contains(&i) {
                Err(ProbeError::skip("missing"))
            } else {
                Ok(())
            }
        });

        let rx = job.events().subscribe();
        assert_eq!(job.run().unwrap(), JobOutcome::Completed);
        rx.try_iter()
            .filter_map(|e| match e {
                JobEvent::Probed { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_all_accepted_visits_sequence() {
        assert_eq!(accepted(1, 10, 1, &[]), (1..=10).collect::<Vec<_>>());
        assert_eq!(accepted(10, 1, -3, &[]), vec![10, 7, 4, 1]);
        assert_eq!(accepted(0, 9, 4, &[]), vec![0, 4, 8]);
    }

    #[test]
    fn test_leading_rejections() {
        assert_eq!(accepted(1, 10, 1, &[1, 2]), vec![3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(accepted(1, 10, 1, &[2, 3]), vec![1, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(accepted(1, 10, 1, &[1, 2, 3]), vec![5, 4, 6, 7, 8, 9, 10]);
        assert_eq!(accepted(1, 10, 1, &[2, 3, 4]), vec![1, 6, 5, 7, 8, 9, 10]);
        assert_eq!(accepted(1, 10, 1, &[1, 2, 3, 4, 5]), vec![7, 6, 8, 9, 10]);
    }

    #[test]
    fn test_descending_rejections() {
        assert_eq!(accepted(10, 1, -1, &[1, 2]), vec![10, 9, 8, 7, 6, 5, 4, 3]);
        assert_eq!(accepted(10, 1, -1, &[8, 9, 10]), vec![6, 7, 5, 4, 3, 2, 1]);
        assert_eq!(accepted(10, 1, -1, &[6, 8, 9, 10]), vec![4, 5, 7, 3, 2, 1]);
    }

    #[test]
    fn test_forward_leap_exhaustion_ends_job() {
        assert_eq!(accepted(10, 1, -1, &[4, 6, 8, 9, 10]), Vec::<i64>::new());
    }

    #[test]
    fn test_strided_rejections() {
        assert_eq!(
            accepted(1, 20, 2, &[3, 4, 5, 7, 9, 13]),
            vec![1, 17, 16, 14, 12, 10, 8, 6, 19]
        );
        assert_eq!(
            accepted(20, 1, -2, &[18, 17, 16, 14, 12]),
            vec![20, 8, 9, 11, 13, 15, 6, 4, 2]
        );
    }

    #[test]
    fn test_leap_offsets_leave_step_grid() {
        // The leap lands on 3 and stepping resumes from there on odd indices
        assert_eq!(
            accepted(0, 20, 2, &[2]),
            vec![0, 3, 5, 7, 9, 11, 13, 15, 17, 19]
        );
    }

    #[test]
    fn test_never_probes_outside_range() {
        let probed = Arc::new(Mutex::new(Vec::new()));
        let p = Arc::clone(&probed);
        let mut job = IndexJob::new(100, Some(140), 1).unwrap();
        job.add_handler(move |i: i64| {
            p.lock().push(i);
            if i % 7 == 0 || i % 5 == 0 {
                Err(ProbeError::skip("sparse"))
            } else {
                Ok(())
            }
        });
        job.run().unwrap();

        let probed = probed.lock();
        assert!(!probed.is_empty());
        assert!(probed.iter().all(|i| (100..=140).contains(i)));
    }

    #[test]
    fn test_single_index_with_zero_step() {
        assert_eq!(accepted(5, 5, 0, &[]), vec![5]);
        assert_eq!(accepted(5, 5, 0, &[5]), Vec::<i64>::new());
    }

    #[test]
    fn test_event_order_per_probe() {
        let mut job = IndexJob::new(1, Some(3), 1).unwrap();
        job.add_handler(|i: i64| {
            if i == 2 {
                Err(ProbeError::skip("gap"))
            } else {
                Ok(())
            }
        });
        let rx = job.events().subscribe();
        job.run().unwrap();

        let events: Vec<JobEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(JobEvent::Running { .. })));
        assert!(matches!(
            events.last(),
            Some(JobEvent::Stopped { outcome: StopReason::Completed, .. })
        ));

        // Every Probing is immediately followed by its result
        for pair in events.windows(2) {
            if let JobEvent::Probing { index, .. } = pair[0] {
                assert_eq!(pair[1].index(), Some(index));
                assert!(!matches!(pair[1], JobEvent::Probing { .. }));
            }
        }
    }

    #[test]
    fn test_unexpected_error_counts_as_rejection() {
        let mut job = IndexJob::new(1, Some(4), 1).unwrap();
        job.add_handler(|i: i64| {
            if i == 1 {
                Err(ProbeError::failed("connection reset"))
            } else {
                Ok(())
            }
        });
        let rx = job.events().subscribe();
        assert_eq!(job.run().unwrap(), JobOutcome::Completed);

        let errors = rx
            .try_iter()
            .filter(|e| matches!(e, JobEvent::UnexpectedError { index: 1, .. }))
            .count();
        // Index 1 is the reverse bound, so the backfill probes it again
        assert_eq!(errors, 2);
        assert_eq!(job.stats().errors(), 2);
        assert_eq!(job.stats().accepted(), 3);
    }

    #[test]
    fn test_handler_panic_counts_as_rejection() {
        let mut job = IndexJob::new(1, Some(5), 1).unwrap();
        job.add_handler(|i: i64| -> Result<(), ProbeError> {
            if i == 3 {
                panic!("handler blew up");
            }
            Ok(())
        });
        let rx = job.events().subscribe();
        assert_eq!(job.run().unwrap(), JobOutcome::Completed);

        let panics = rx
            .try_iter()
            .filter(|e| {
                matches!(e, JobEvent::UnexpectedError { index: 3, error, .. }
                    if error.contains("blew up"))
            })
            .count();
        // 3 is the reverse bound and gets probed twice
        assert_eq!(panics, 2);
        assert_eq!(job.stats().errors(), 2);
        assert_eq!(job.stats().accepted(), 4);
        assert!(job.flags().has(STOPPING));
        assert!(!job.flags().has(STOPPING_WITH_EXCEPTION));
        assert!(!job.is_running());
    }

    #[test]
    fn test_listener_panic_stops_with_exception() {
        let job = IndexJob::new(1, Some(10), 1).unwrap();
        job.events().listen(|event| {
            if let JobEvent::Probed { index: 4, .. } = event {
                panic!("listener broke");
            }
        });
        let rx = job.events().subscribe();

        match job.run() {
            Err(JobError::Panicked { message, .. }) => assert!(message.contains("listener broke")),
            other => panic!("expected a panic error, got {other:?}"),
        }
        assert!(job.flags().all_strict([STOPPING, STOPPING_WITH_EXCEPTION]));
        assert!(!job.is_running());
        assert!(matches!(
            rx.try_iter().last(),
            Some(JobEvent::Stopped { outcome: StopReason::Failed(_), .. })
        ));
    }

    #[test]
    fn test_stop_aborts_job() {
        let mut job = IndexJob::new(1, Some(100), 1).unwrap();
        job.add_handler(|i: i64| {
            if i == 5 {
                Err(ProbeError::stop("quota exceeded"))
            } else {
                Ok(())
            }
        });
        let rx = job.events().subscribe();

        let err = job.run().unwrap_err();
        assert!(matches!(err, JobError::Stopped { index: 5, .. }));
        assert!(job.flags().all_strict([STOPPING, STOPPING_WITH_EXCEPTION]));
        assert_eq!(job.current(), Some(5));

        let stopped = rx.try_iter().last();
        assert!(matches!(
            stopped,
            Some(JobEvent::Stopped { outcome: StopReason::Failed(_), .. })
        ));
    }

    #[test]
    fn test_cancel_before_run() {
        let job = IndexJob::new(1, Some(100), 1).unwrap();
        job.cancel().unwrap();
        assert!(job.flags().has(CANCELING));

        assert_eq!(job.run().unwrap(), JobOutcome::Canceled);
        assert!(job.flags().all_strict([STOPPING, STOPPING_WITH_CANCELED]));
        assert_eq!(job.current(), None);
    }

    #[test]
    fn test_cancel_while_running() {
        let job = Arc::new(IndexJob::new(0, None, 1).unwrap());
        let probes = job.events().subscribe();
        let runner = Arc::clone(&job);
        let handle = std::thread::spawn(move || runner.run());

        for event in probes.iter() {
            if matches!(event, JobEvent::Probed { index, .. } if index >= 10) {
                job.cancel().unwrap();
                break;
            }
        }

        assert_eq!(handle.join().unwrap().unwrap(), JobOutcome::Canceled);
        assert!(job.flags().all_strict([STOPPING, STOPPING_WITH_CANCELED]));
        assert!(!job.flags().has(CANCELING));
    }

    #[test]
    fn test_restart_fails() {
        let job = IndexJob::new(1, Some(3), 1).unwrap();
        job.run().unwrap();
        assert!(matches!(job.run(), Err(JobError::AlreadyStopped { .. })));
    }

    #[test]
    fn test_progress_tracks_worked_span() {
        let job = IndexJob::new(0, Some(99), 1).unwrap();
        assert_eq!(job.processed(), 0.0);
        job.run().unwrap();
        assert_eq!(job.worked_span().min(), Some(0));
        assert_eq!(job.worked_span().max(), Some(99));
        assert!((job.processed() - 1.0).abs() < 1e-12);
    }
}
