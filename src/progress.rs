//! Terminal progress for a fetch run
//!
//! A spinner line fed from [`MonitorReport`] snapshots, plus the header and
//! summary blocks printed around the run.

use crate::fetcher::FetchSummary;
use crate::monitor::{Eta, MonitorReport};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const RULE_WIDTH: usize = 50;

/// Spinner showing aggregate progress of the running jobs
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let spinner = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        bar.set_style(spinner);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn update(&self, report: &MonitorReport) {
        self.bar.set_message(status_line(report));
    }

    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn status_line(report: &MonitorReport) -> String {
    let progress = report
        .processed
        .map_or_else(|| "-".to_string(), |p| format!("{:.1}%", p * 100.0));
    let rate = report
        .average_speed
        .map_or_else(|| "-".to_string(), |s| format!("{:.0}/s", s));
    format!(
        "Probed: {} | Accepted: {} | Progress: {} | Rate: {} | ETA: {} | Jobs: {}/{}",
        format_number(report.total_probes),
        format_number(report.accepted_probes),
        progress,
        rate,
        format_eta(report.remaining_time),
        report.running_jobs,
        report.jobs.len(),
    )
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `1h02m03s`, `4m05s`, `6s`; `-` when unknown or unbounded
pub fn format_eta(eta: Option<Eta>) -> String {
    let Some(remaining) = eta.and_then(|e| e.as_duration()) else {
        return "-".to_string();
    };
    let secs = remaining.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Print a header at the start of the run
pub fn print_header(span: &str, jobs: usize, output: Option<&str>) {
    println!();
    println!(
        "{} {}",
        style("index-fetcher").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(RULE_WIDTH)).dim());
    println!("  {} {}", style("Range:").bold(), span);
    println!("  {} {}", style("Jobs:").bold(), jobs);
    println!("  {} {}", style("Output:").bold(), output.unwrap_or("(none)"));
    println!();
}

/// Print the totals of a finished run
pub fn print_summary(
    summary: &FetchSummary,
    interrupted: bool,
    duration: Duration,
    db_path: Option<&str>,
    db_size: Option<u64>,
) {
    let secs = duration.as_secs_f64();
    let rate = if secs > 0.0 {
        summary.probes as f64 / secs
    } else {
        0.0
    };

    println!();
    if interrupted {
        println!("{}", style("Fetch Interrupted").yellow().bold());
    } else {
        println!("{}", style("Fetch Complete").green().bold());
    }
    println!("{}", style("─".repeat(RULE_WIDTH)).dim());
    println!("  {} {}", style("Jobs:").bold(), summary.jobs);
    println!("  {} {}", style("Probed:").bold(), format_number(summary.probes));
    println!("  {} {}", style("Accepted:").bold(), format_number(summary.accepted));
    println!("  {} {}", style("Skipped:").bold(), format_number(summary.skipped));
    println!(
        "  {} {:.1}s ({:.0} probes/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
    if summary.errors > 0 {
        println!(
            "  {} {}",
            style("Errors:").yellow().bold(),
            format_number(summary.errors)
        );
    }
    match (db_path, db_size) {
        (Some(path), Some(size)) => {
            println!("  {} {} ({})", style("Database:").bold(), path, format_size(size, BINARY))
        }
        (Some(path), None) => println!("  {} {}", style("Database:").bold(), path),
        (None, _) => {}
    }
    println!();
}
