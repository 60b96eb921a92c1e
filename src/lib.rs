//! index-fetcher - adaptive integer-index prober
//!
//! Probes every index of an integer range through caller-supplied handlers.
//! Present indices tend to cluster, so after a rejected index a job leaps
//! ahead with growing offsets instead of grinding through the gap, then
//! walks back from the first accepted leap to recover what it jumped over.
//!
//! # Features
//!
//! - **Flag groups**: hierarchical, mutually exclusive, thread-safe state
//!   flags with blocking waits and transition callbacks.
//!
//! - **Adaptive jobs**: step / leap / reverse traversal of one range on one
//!   thread, with per-probe events and cooperative cancellation.
//!
//! - **Weighted fetcher**: splits a range into contiguous chunks by weight
//!   and runs one job per chunk in parallel.
//!
//! - **Monitor**: samples job progress each tick for speed and ETA.
//!
//! - **SQLite output**: accepted indices are upserted by a batched writer.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────────┐
//!                      │     IndexFetcher     │  task flags
//!                      └──────────┬───────────┘
//!                                 │ split by weight
//!          ┌──────────────────────┼──────────────────────┐
//!          ▼                      ▼                      ▼
//!   ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//!   │  IndexJob   │        │  IndexJob   │  ...   │  IndexJob   │  job-step flags
//!   │ step/leap/  │        │             │        │             │
//!   │  reverse    │        │             │        │             │
//!   └──────┬──────┘        └──────┬──────┘        └──────┬──────┘
//!          │ probe(i)             │                      │
//!          ▼                      ▼                      ▼
//!     ProbeHandlers ──accepted──► events ──► Monitor (speed, ETA)
//!                                   │
//!                                   ▼
//!                             RecordWriter ──► SQLite
//! ```
//!
//! # Example
//!
//! ```bash
//! # Probe 1..=100000 on 8 jobs, accepting indices ending in 7
//! index-fetcher 1 100000 -w 8 --accept-pattern '7$' -o hits.db
//!
//! # Query results
//! sqlite3 hits.db "SELECT id, job_id FROM records ORDER BY id LIMIT 10"
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod flag;
pub mod job;
pub mod monitor;
pub mod progress;
pub mod span;

pub use config::{AcceptRule, CliArgs, FetchConfig};
pub use error::{FetcherError, ProbeError, Result};
pub use fetcher::{FetchSummary, IndexFetcher};
pub use flag::{Flag, FlagGroup, Vocabulary};
pub use job::{IndexJob, JobEvent, JobId, JobOutcome, JumpPolicy};
pub use monitor::{Eta, Monitor, MonitorReport};
pub use span::StepSpan;
