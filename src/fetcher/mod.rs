//! Weighted parallel fetching
//!
//! ```text
//!                 IndexFetcher
//!                      │ plan(): split range by weight
//!        ┌─────────────┼─────────────┐
//!        ▼             ▼             ▼
//!   ┌─────────┐   ┌─────────┐   ┌─────────┐
//!   │ job 0   │   │ job 1   │   │ job N   │   one named thread each
//!   └────┬────┘   └────┬────┘   └────┬────┘
//!        │ handlers    │             │
//!        └─────────────┴──────┬──────┘
//!                             ▼
//!                 completion channel ──► join()/stop()
//! ```

mod coordinator;
mod split;
mod worker;

pub use coordinator::{FetchSummary, FetcherBuilder, IndexFetcher, DEFAULT_NAME};
pub use split::{normalize_weights, plan};
pub use worker::JobWorker;

use crate::job::{JobId, StopReason};

/// Events published on a fetcher's own channel
#[derive(Debug, Clone, PartialEq)]
pub enum FetcherEvent {
    /// Jobs were created for a new start
    Started { jobs: Vec<JobId> },
    /// A job's worker thread finished
    JobFinished { job: JobId, outcome: StopReason },
    /// The fetcher entered its stopping state
    Stopped,
}
