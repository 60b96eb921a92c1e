//! index-fetcher - adaptive integer-index prober
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use index_fetcher::config::{CliArgs, FetchConfig, WRITER_CHANNEL_SIZE};
use index_fetcher::db::{keys, Record, RecordWriter, WriterHandle};
use index_fetcher::error::{FetcherError, ProbeError};
use index_fetcher::fetcher::{FetchSummary, IndexFetcher};
use index_fetcher::job::JobEvent;
use index_fetcher::monitor::{Monitor, MonitorReport};
use index_fetcher::progress::{print_header, print_summary, ProgressReporter};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the control loop checks for completion and interrupts
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long running jobs get to observe a cancel
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Final output with `--json`
#[derive(Serialize)]
struct RunReport {
    interrupted: bool,
    duration_secs: f64,
    summary: FetchSummary,
    monitor: MonitorReport,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose)?;

    let config = FetchConfig::from_args(args).context("Invalid configuration")?;
    let output = config.output_path.as_ref().map(|p| p.display().to_string());

    if config.show_progress {
        print_header(&config.span.to_string(), config.job_count(), output.as_deref());
    }

    let writer = match &config.output_path {
        Some(path) => Some(
            RecordWriter::new(path, config.batch_size, WRITER_CHANNEL_SIZE)
                .context("Failed to open output database")?,
        ),
        None => None,
    };

    let fetcher = Arc::new(build_fetcher(&config)?);
    if let Some(handle) = writer.as_ref().map(RecordWriter::handle) {
        persist_accepted(&fetcher, handle);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let monitor = Monitor::new(config.tick).context("Failed to create monitor")?;
    monitor.watch(fetcher.clone());
    monitor.start().context("Failed to start monitor")?;

    let progress = config.show_progress.then(ProgressReporter::new);
    let started = Instant::now();
    let start_time = Utc::now().to_rfc3339();

    fetcher.start().context("Failed to start fetcher")?;
    let (interrupted, result) = wait_for_jobs(&fetcher, &monitor, progress.as_ref(), &shutdown);
    let duration = started.elapsed();

    monitor.stop().context("Failed to stop monitor")?;
    if let Some(e) = monitor.take_error() {
        warn!(error = %e, "Monitor ended with an error");
    }

    if let Some(p) = &progress {
        p.finish(if interrupted { "Fetch interrupted" } else { "Fetch completed" });
    }

    let summary = fetcher.summary();
    if let Some(writer) = writer {
        record_run_info(&writer.handle(), &config, &summary, &start_time, duration)?;
        if interrupted {
            writer.interrupt().context("Failed to finalize database")?;
        } else {
            writer.finish().context("Failed to finalize database")?;
        }
    }

    if config.json {
        let report = RunReport {
            interrupted,
            duration_secs: duration.as_secs_f64(),
            summary: summary.clone(),
            monitor: monitor.report(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if config.show_progress {
        let db_size = config
            .output_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len());
        print_summary(&summary, interrupted, duration, output.as_deref(), db_size);
    }

    if interrupted {
        info!("Fetch was interrupted before completion");
    }
    if summary.errors > 0 {
        info!(errors = summary.errors, "Fetch completed with handler errors");
    }

    result.context("Fetch failed")
}

fn build_fetcher(config: &FetchConfig) -> Result<IndexFetcher> {
    let span = config.span;
    let accept = config.accept.clone();

    let fetcher = IndexFetcher::builder(span.begin())
        .end_opt((!span.is_unbounded()).then(|| span.end()))
        .step(span.step())
        .weights(config.weights.clone())
        .jump(config.jump)
        .handler(move |index: i64| {
            if accept.accepts(index) {
                Ok(())
            } else {
                Err(ProbeError::skip("not accepted"))
            }
        })
        .build()
        .context("Failed to build fetcher")?;
    Ok(fetcher)
}

/// Queue a record for every accepted index
fn persist_accepted(fetcher: &IndexFetcher, handle: WriterHandle) {
    fetcher.on_job_event(move |event| {
        if let JobEvent::Probed { job, index } = event {
            if let Err(e) = handle.send_record(Record::new(*index, *job)) {
                warn!(index = *index, error = %e, "Failed to queue record");
            }
        }
    });
}

/// Block until the jobs finish or an interrupt arrives
///
/// Returns whether the run was interrupted, and the first job error.
fn wait_for_jobs(
    fetcher: &IndexFetcher,
    monitor: &Monitor,
    progress: Option<&ProgressReporter>,
    shutdown: &AtomicBool,
) -> (bool, std::result::Result<(), FetcherError>) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            if let Some(p) = progress {
                p.set_status("Canceling jobs...");
            }
            return (true, fetcher.stop(Some(STOP_TIMEOUT)));
        }

        match fetcher.join(Some(POLL_INTERVAL)) {
            Err(FetcherError::Timeout { .. }) => {
                if let Some(p) = progress {
                    p.update(&monitor.report());
                }
            }
            joined => {
                // Every job has exited, so stopping only settles the flags
                let stopped = fetcher.stop(None);
                return (false, joined.and(stopped));
            }
        }
    }
}

fn record_run_info(
    handle: &WriterHandle,
    config: &FetchConfig,
    summary: &FetchSummary,
    start_time: &str,
    duration: Duration,
) -> Result<()> {
    let weights = serde_json::to_string(&config.weights)?;
    let entries = [
        (keys::SPAN, config.span.to_string()),
        (keys::WEIGHTS, weights),
        (keys::START_TIME, start_time.to_string()),
        (keys::END_TIME, Utc::now().to_rfc3339()),
        (keys::DURATION_SECS, format!("{:.3}", duration.as_secs_f64())),
        (keys::JOB_COUNT, summary.jobs.to_string()),
        (keys::TOTAL_PROBES, summary.probes.to_string()),
        (keys::TOTAL_ACCEPTED, summary.accepted.to_string()),
        (keys::ERROR_COUNT, summary.errors.to_string()),
    ];
    for (key, value) in entries {
        handle
            .set_run_info(key, value)
            .context("Failed to record run info")?;
    }
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("index_fetcher=debug,warn")
    } else {
        EnvFilter::new("index_fetcher=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
