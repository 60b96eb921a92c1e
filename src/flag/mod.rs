//! Hierarchical, mutually exclusive flags
//!
//! Flags describe lifecycle state for jobs, fetchers and the monitor.
//! A [`Vocabulary`] fixes which flags exist, which imply which (parents)
//! and which exclude each other. A [`FlagGroup`] holds the flags currently
//! set for one object and enforces those rules on every change.

pub mod builtin;
mod group;
mod member;
mod vocabulary;

pub use builtin::{job_step_vocabulary, task_vocabulary};
pub use group::{FlagGroup, FlagSelector};
pub use member::{Flag, SEPARATOR};
pub use vocabulary::Vocabulary;
