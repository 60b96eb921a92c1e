//! Error types for index-fetcher
//!
//! This module defines the error hierarchy that covers:
//! - Flag vocabulary registration and flag group mutation
//! - Probe handler results
//! - Job lifecycle failures
//! - Configuration and CLI errors
//! - SQLite record store errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - A rejected probe is a normal result, not a failure of the job
//! - Cancellation is an outcome, not an error

use std::any::Any;
use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobId;

/// Top-level error type for the index-fetcher application
#[derive(Error, Debug)]
pub enum FetcherError {
    /// Flag vocabulary or flag group errors
    #[error("Flag error: {0}")]
    Flag(#[from] FlagError),

    /// A job failed while running
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Waiting for jobs exceeded the caller's timeout
    #[error("Timed out waiting for {pending} job(s) to finish")]
    Timeout { pending: usize },

    /// The fetcher was stopped and cannot be started again
    #[error("Fetcher '{name}' has already been stopped")]
    AlreadyStopped { name: String },

    /// The fetcher still has jobs in flight
    #[error("Fetcher '{name}' is already running {jobs} job(s)")]
    AlreadyRunning { name: String, jobs: usize },

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker for job {job}: {reason}")]
    SpawnFailed { job: JobId, reason: String },
}

/// Flag vocabulary and flag group errors
///
/// A failing mutation always leaves the flag group unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlagError {
    /// A name, alias or parent identifier is malformed
    #[error("Invalid flag name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A flag carries neither a name nor an alias
    #[error("Flag must have at least one name or alias")]
    Unnamed,

    /// A name or alias is already taken in the vocabulary
    #[error("Flag name '{name}' is already registered in vocabulary '{vocabulary}'")]
    NameConflict { name: String, vocabulary: String },

    /// A parent references a flag the vocabulary does not know
    #[error("Flag '{flag}' has unknown parent '{parent}'")]
    InvalidParent { flag: String, parent: String },

    /// Parent references form a cycle
    #[error("Flag parents form a cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// Lookup of a name that is not registered
    #[error("Unknown flag '{name}' in vocabulary '{vocabulary}'")]
    UnknownFlag { name: String, vocabulary: String },

    /// A flag from another vocabulary was handed to a group
    #[error("Flag '{flag}' does not belong to vocabulary '{vocabulary}'")]
    Incompatible { flag: String, vocabulary: String },

    /// A parent is absent and automatic parent insertion is disabled
    #[error("Cannot set '{flag}': parent '{parent}' is not set")]
    MissingParent { flag: String, parent: String },

    /// Two members of one mutual-exclusion group would be present together
    #[error("Flags are mutually exclusive: {}", .members.join(", "))]
    MutexConflict { members: Vec<String> },

    /// A remaining member still depends on the member being removed
    #[error("Cannot unset '{flag}': '{dependent}' depends on it")]
    Dependent { flag: String, dependent: String },
}

/// Result of a single handler invocation that did not accept the index
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The index holds nothing; counts as a rejection and drives leaping
    #[error("skipped: {0}")]
    Skip(String),

    /// The handler requests the owning job to abort
    #[error("stop requested: {0}")]
    Stop(String),

    /// Anything else went wrong; logged and counted as a rejection
    #[error("handler failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ProbeError {
    pub fn skip(reason: impl Into<String>) -> Self {
        ProbeError::Skip(reason.into())
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        ProbeError::Stop(reason.into())
    }

    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ProbeError::Failed(error.into())
    }
}

/// Job lifecycle errors surfaced by `IndexJob::run` and `IndexFetcher::join`
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// A handler asked the job to stop
    #[error("Job {job} stopped by handler at index {index}: {reason}")]
    Stopped {
        job: JobId,
        index: i64,
        reason: String,
    },

    /// The job's flag group rejected a lifecycle transition
    #[error("Job {job} flag transition failed: {source}")]
    Flag { job: JobId, source: FlagError },

    /// The job already reached a stopping state
    #[error("Job {job} has already been stopped")]
    AlreadyStopped { job: JobId },

    /// Another thread is running the job
    #[error("Job {job} is already running")]
    AlreadyRunning { job: JobId },

    /// The job's traversal or its worker thread panicked
    #[error("Job {job} panicked: {message}")]
    Panicked { job: JobId, message: String },
}

impl JobError {
    /// Job the error belongs to
    pub fn job(&self) -> JobId {
        match self {
            JobError::Stopped { job, .. }
            | JobError::Flag { job, .. }
            | JobError::AlreadyStopped { job }
            | JobError::AlreadyRunning { job }
            | JobError::Panicked { job, .. } => *job,
        }
    }

    /// True if a handler requested the stop
    pub fn is_handler_stop(&self) -> bool {
        matches!(self, JobError::Stopped { .. })
    }
}

/// Database errors
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to create database file
    #[error("Failed to create database at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },

    /// Writer channel closed unexpectedly
    #[error("Database writer channel closed unexpectedly")]
    ChannelClosed,

    /// The writer thread panicked before finishing
    #[error("Database writer thread panicked")]
    WriterPanicked,
}

/// Configuration and CLI errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Step direction disagrees with begin/end
    #[error("Invalid span {begin}..={end} with step {step}: {reason}")]
    InvalidSpan {
        begin: i64,
        end: i64,
        step: i64,
        reason: String,
    },

    /// Weights are empty, non-finite or non-positive
    #[error("Invalid weights {weights:?}: {reason}")]
    InvalidWeights { weights: Vec<f64>, reason: String },

    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Jump sequence cannot make progress
    #[error("Invalid jump policy base {base} repeat {repeat}: {reason}")]
    InvalidJump {
        base: i64,
        repeat: u32,
        reason: String,
    },

    /// Monitor tick interval out of range
    #[error("Invalid tick interval {millis}ms: must be between {min} and {max}")]
    InvalidTickInterval { millis: u64, min: u64, max: u64 },

    /// Invalid batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Invalid accept pattern
    #[error("Invalid accept pattern '{pattern}': {reason}")]
    InvalidAcceptPattern { pattern: String, reason: String },

    /// Accept file could not be used
    #[error("Invalid accept file '{path}': {reason}")]
    InvalidAcceptFile { path: PathBuf, reason: String },

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },
}

/// Result type alias for FetcherError
pub type Result<T> = std::result::Result<T, FetcherError>;

/// Result type alias for FlagError
pub type FlagResult<T> = std::result::Result<T, FlagError>;

/// Result type alias for JobError
pub type JobResult<T> = std::result::Result<T, JobError>;

/// Result type alias for DbError
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Represents the outcome of probing a single index
#[derive(Debug)]
pub enum ProbeOutcome {
    /// A handler found something at the index
    Accepted { index: i64 },

    /// Handlers reported nothing at the index
    Skipped { index: i64, reason: String },

    /// A handler failed unexpectedly
    Failed { index: i64, error: String },
}

impl ProbeOutcome {
    /// Returns true if the index was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProbeOutcome::Accepted { .. })
    }

    /// Returns the index associated with this outcome
    pub fn index(&self) -> i64 {
        match self {
            ProbeOutcome::Accepted { index }
            | ProbeOutcome::Skipped { index, .. }
            | ProbeOutcome::Failed { index, .. } => *index,
        }
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".into()
    }
}
