//! Configuration types for index-fetcher
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - The accept rule the binary's probe handler applies

use crate::error::ConfigError;
use crate::fetcher::normalize_weights;
use crate::job::{JumpPolicy, DEFAULT_BASE, DEFAULT_REPEAT};
use crate::span::StepSpan;
use clap::Parser;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum reasonable worker count
pub const MAX_WORKERS: usize = 512;

/// Monitor tick limits, in milliseconds
pub const MIN_TICK_MS: u64 = 10;
pub const MAX_TICK_MS: u64 = 60_000;

/// Batch size limits
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Records buffered between handlers and the writer thread
pub const WRITER_CHANNEL_SIZE: usize = 10_000;

/// Adaptive integer-index prober
#[derive(Parser, Debug, Clone)]
#[command(
    name = "index-fetcher",
    version,
    about = "Adaptive integer-index prober with weighted parallel jobs",
    long_about = "Probes every index of BEGIN..=END (unbounded without END) across parallel jobs.\n\n\
                  After a rejected index a job leaps ahead with growing offsets; once a leap \n\
                  is accepted it walks back to pick up what the leap skipped.",
    after_help = "EXAMPLES:\n    \
        index-fetcher 1 100000 --accept-pattern '^[0-9]*7$' -o hits.db\n    \
        index-fetcher 0 9999 --weight 1 --weight 3 --accept-file ids.txt\n    \
        index-fetcher 1000 1 --step -1 --json",
    allow_negative_numbers = true
)]
pub struct CliArgs {
    /// First index to probe
    #[arg(value_name = "BEGIN")]
    pub begin: i64,

    /// Last index to probe, inclusive (unbounded if omitted)
    #[arg(value_name = "END")]
    pub end: Option<i64>,

    /// Distance between consecutive indices; the sign sets the direction
    #[arg(short = 's', long, default_value_t = 1, value_name = "NUM")]
    pub step: i64,

    /// Relative share of the range for one job (repeatable)
    #[arg(long = "weight", value_name = "W", action = clap::ArgAction::Append)]
    pub weights: Vec<f64>,

    /// Number of equally weighted jobs, ignored when --weight is given
    #[arg(short = 'w', long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Monitor sampling interval
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    pub tick_ms: u64,

    /// Growth factor of the leap offsets
    #[arg(long, default_value_t = DEFAULT_BASE, value_name = "NUM")]
    pub jump_base: i64,

    /// Leaps made at each offset size
    #[arg(long, default_value_t = DEFAULT_REPEAT, value_name = "NUM")]
    pub jump_repeat: u32,

    /// File of accepted indices, one per line ('#' starts a comment)
    #[arg(long, value_name = "FILE", conflicts_with = "accept_pattern")]
    pub accept_file: Option<PathBuf>,

    /// Accept indices whose decimal form matches this regex
    #[arg(long, value_name = "REGEX")]
    pub accept_pattern: Option<String>,

    /// SQLite database receiving accepted indices
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// SQLite batch upsert size
    #[arg(short = 'b', long, default_value_t = 1000, value_name = "NUM")]
    pub batch_size: usize,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Default job count when neither weights nor workers are given
pub fn default_workers() -> usize {
    num_cpus::get().clamp(1, MAX_WORKERS)
}

/// Which probed indices count as present
#[derive(Clone)]
pub enum AcceptRule {
    /// Every index is accepted
    All,

    /// Only indices listed in a file
    Ids(HashSet<i64>),

    /// Indices whose decimal representation matches
    Pattern(Regex),
}

impl AcceptRule {
    pub fn accepts(&self, index: i64) -> bool {
        match self {
            AcceptRule::All => true,
            AcceptRule::Ids(ids) => ids.contains(&index),
            AcceptRule::Pattern(re) => re.is_match(&index.to_string()),
        }
    }

    /// Parse an id list: one integer per line, blank lines and `#` comments ignored
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidAcceptFile {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;

        let mut ids = HashSet::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let id = line
                .parse::<i64>()
                .map_err(|e| invalid(format!("line {}: '{}': {}", lineno + 1, line, e)))?;
            ids.insert(id);
        }
        Ok(AcceptRule::Ids(ids))
    }

    pub fn from_pattern(pattern: &str) -> Result<Self, ConfigError> {
        Regex::new(pattern)
            .map(AcceptRule::Pattern)
            .map_err(|e| ConfigError::InvalidAcceptPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for AcceptRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptRule::All => write!(f, "All"),
            AcceptRule::Ids(ids) => write!(f, "Ids({} ids)", ids.len()),
            AcceptRule::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub span: StepSpan,

    /// Normalized, summing to 1
    pub weights: Vec<f64>,

    pub jump: JumpPolicy,

    pub tick: Duration,

    pub accept: AcceptRule,

    /// Where accepted indices are stored, if anywhere
    pub output_path: Option<PathBuf>,

    pub batch_size: usize,

    pub show_progress: bool,

    pub verbose: bool,

    pub json: bool,
}

impl FetchConfig {
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let span = StepSpan::new(args.begin, args.end, args.step)?;

        let weights = if args.weights.is_empty() {
            let workers = args.workers.unwrap_or_else(default_workers);
            if workers == 0 || workers > MAX_WORKERS {
                return Err(ConfigError::InvalidWorkerCount {
                    count: workers,
                    max: MAX_WORKERS,
                });
            }
            vec![1.0; workers]
        } else {
            args.weights.clone()
        };
        if weights.len() > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: weights.len(),
                max: MAX_WORKERS,
            });
        }
        let weights = normalize_weights(&weights)?;

        let jump = JumpPolicy::new(args.jump_base, args.jump_repeat)?;

        if !(MIN_TICK_MS..=MAX_TICK_MS).contains(&args.tick_ms) {
            return Err(ConfigError::InvalidTickInterval {
                millis: args.tick_ms,
                min: MIN_TICK_MS,
                max: MAX_TICK_MS,
            });
        }

        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&args.batch_size) {
            return Err(ConfigError::InvalidBatchSize {
                size: args.batch_size,
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            });
        }

        let accept = match (&args.accept_file, &args.accept_pattern) {
            (Some(path), _) => AcceptRule::from_file(path)?,
            (None, Some(pattern)) => AcceptRule::from_pattern(pattern)?,
            (None, None) => AcceptRule::All,
        };

        if let Some(output) = &args.output {
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidOutputPath {
                        path: output.clone(),
                        reason: format!("Parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
            if output.is_dir() {
                return Err(ConfigError::InvalidOutputPath {
                    path: output.clone(),
                    reason: "Output path is a directory".to_string(),
                });
            }
        }

        Ok(Self {
            span,
            weights,
            jump,
            tick: Duration::from_millis(args.tick_ms),
            accept,
            output_path: args.output,
            batch_size: args.batch_size,
            show_progress: !args.quiet && !args.json,
            verbose: args.verbose,
            json: args.json,
        })
    }

    pub fn job_count(&self) -> usize {
        self.weights.len()
    }
}
