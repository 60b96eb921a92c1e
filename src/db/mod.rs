//! SQLite storage for accepted indices
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Job threads (N)                        │
//! │  - accept handler sends Record via channel          │
//! └─────────────────────┬───────────────────────────────┘
//!                       │ WriterMessage
//!                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │              RecordWriter thread                    │
//! │  - buffers records                                  │
//! │  - upserts a batch per transaction                  │
//! └─────────────────────┬───────────────────────────────┘
//!                       │
//!                       ▼
//!               records / run_info tables
//! ```

pub mod schema;
pub mod writer;

pub use schema::{create_database, create_indexes, get_run_info, keys, optimize_for_reads, set_run_info};
pub use writer::{Record, RecordWriter, WriterHandle, WriterMessage, WriterStats};
