//! Integration tests for index-fetcher
//!
//! These drive the public API end to end: config parsing, fetch runs with
//! persistence, and monitoring.

use clap::Parser;
use index_fetcher::config::{CliArgs, FetchConfig};
use index_fetcher::db::{keys, schema, Record, RecordWriter};
use index_fetcher::error::ProbeError;
use index_fetcher::fetcher::{FetcherEvent, IndexFetcher};
use index_fetcher::flag::builtin::{CANCELING, PENDING, RUNNING, STOPPING};
use index_fetcher::flag::{task_vocabulary, FlagGroup};
use index_fetcher::job::{IndexJob, JobEvent, StopReason};
use index_fetcher::monitor::Monitor;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn accepted_in_order(job: &IndexJob) -> Vec<i64> {
    let events = job.events().subscribe();
    job.run().unwrap();
    events
        .try_iter()
        .filter_map(|e| match e {
            JobEvent::Probed { index, .. } => Some(index),
            _ => None,
        })
        .collect()
}

#[test]
fn test_rejected_prefix_is_skipped_in_order() {
    let mut job = IndexJob::new(1, Some(10), 1).unwrap();
    job.add_handler(|i: i64| {
        if i == 1 || i == 2 {
            Err(ProbeError::skip("absent"))
        } else {
            Ok(())
        }
    });
    assert_eq!(accepted_in_order(&job), vec![3, 4, 5, 6, 7, 8, 9, 10]);
}

#[test]
fn test_accept_all_visits_each_index_once() {
    let job = IndexJob::new(10, Some(-10), -2).unwrap();
    let expected: Vec<i64> = (-10..=10).rev().step_by(2).collect();
    assert_eq!(accepted_in_order(&job), expected);
    assert_eq!(job.stats().probes(), expected.len() as u64);
}

#[test]
fn test_plan_for_two_equal_weights() {
    let fetcher = IndexFetcher::new(0, Some(99), 1, vec![1.0, 1.0]).unwrap();
    let chunks: Vec<(i64, i64)> = fetcher
        .plan()
        .unwrap()
        .iter()
        .map(|c| (c.begin(), c.end()))
        .collect();
    assert_eq!(chunks, vec![(0, 49), (50, 99)]);
}

#[test]
fn test_sparse_fetch_persists_accepted_indices() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("hits.db");
    let writer = RecordWriter::new(&db_path, 16, 1000).unwrap();
    let handle = writer.handle();

    let present: BTreeSet<i64> = (0..2000).filter(|i| (i / 50) % 2 == 0).collect();
    let accept = present.clone();
    let fetcher = IndexFetcher::builder(0)
        .end(1999)
        .weights(vec![1.0, 2.0, 1.0])
        .handler(move |i: i64| {
            if accept.contains(&i) {
                Ok(())
            } else {
                Err(ProbeError::skip("absent"))
            }
        })
        .build()
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    fetcher.on_job_event(move |event| {
        if let JobEvent::Probed { job, index } = event {
            s.lock().unwrap().push(*index);
            handle.send_record(Record::new(*index, *job)).unwrap();
        }
    });

    fetcher.start().unwrap();
    fetcher.join(None).unwrap();
    fetcher.stop(None).unwrap();
    writer.finish().unwrap();

    let accepted = seen.lock().unwrap().clone();
    let seen: BTreeSet<i64> = accepted.iter().copied().collect();
    // Every present index is accepted, and only once
    assert_eq!(seen, present);
    assert_eq!(accepted.len(), present.len());
    assert_eq!(fetcher.summary().accepted, present.len() as u64);

    let conn = Connection::open(&db_path).unwrap();
    let stored: BTreeSet<i64> = conn
        .prepare("SELECT id FROM records")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(stored, seen);
    assert_eq!(
        schema::get_run_info(&conn, keys::STATUS).unwrap(),
        Some("completed".to_string())
    );
}

#[test]
fn test_probes_stay_inside_chunks() {
    let probed = Arc::new(Mutex::new(Vec::new()));
    let p = Arc::clone(&probed);
    let fetcher = IndexFetcher::builder(100)
        .end(400)
        .step(3)
        .workers(3)
        .handler(move |i: i64| {
            p.lock().unwrap().push(i);
            if i % 7 == 0 {
                Ok(())
            } else {
                Err(ProbeError::skip("absent"))
            }
        })
        .build()
        .unwrap();

    fetcher.start().unwrap();
    fetcher.join(None).unwrap();

    let probed = probed.lock().unwrap();
    assert!(probed.contains(&100));
    for i in probed.iter() {
        assert!((100..=400).contains(i), "probed {i} outside the range");
    }
}

#[test]
fn test_config_drives_fetcher() {
    let args = CliArgs::try_parse_from([
        "index-fetcher", "1", "500", "--weight", "1", "--weight", "4", "--accept-pattern", "5$",
        "--json",
    ])
    .unwrap();
    let config = FetchConfig::from_args(args).unwrap();
    assert!(!config.show_progress);

    let accept = config.accept.clone();
    let fetcher = IndexFetcher::builder(config.span.begin())
        .end(config.span.end())
        .weights(config.weights.clone())
        .jump(config.jump)
        .handler(move |i: i64| {
            if accept.accepts(i) {
                Ok(())
            } else {
                Err(ProbeError::skip("absent"))
            }
        })
        .build()
        .unwrap();

    let plan = fetcher.plan().unwrap();
    assert_eq!(plan.len(), 2);
    assert_eq!((plan[0].begin(), plan[0].end()), (1, 100));
    assert_eq!((plan[1].begin(), plan[1].end()), (101, 500));

    fetcher.start().unwrap();
    fetcher.join(None).unwrap();
    assert!(fetcher.summary().accepted > 0);
}

#[test]
fn test_cancel_unbounded_fetch_with_monitor() {
    let fetcher = Arc::new(
        IndexFetcher::builder(0)
            .handler(|_: i64| -> Result<(), ProbeError> {
                thread::sleep(Duration::from_micros(200));
                Ok(())
            })
            .build()
            .unwrap(),
    );
    let events = fetcher.events().subscribe();

    let monitor = Monitor::new(Duration::from_millis(20)).unwrap();
    monitor.watch(fetcher.clone());
    monitor.start().unwrap();
    fetcher.start().unwrap();

    thread::sleep(Duration::from_millis(150));
    let report = monitor.report();
    assert_eq!(report.running_jobs, 1);
    assert!(report.processed.is_some());

    fetcher.stop(Some(Duration::from_secs(10))).unwrap();
    monitor.stop().unwrap();

    let finished: Vec<StopReason> = events
        .try_iter()
        .filter_map(|e| match e {
            FetcherEvent::JobFinished { outcome, .. } => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![StopReason::Canceled]);
    assert_eq!(monitor.report().running_jobs, 0);
    assert!(fetcher.summary().probes > 0);
}

#[test]
fn test_flag_group_wait_across_threads() {
    let group = Arc::new(FlagGroup::new(task_vocabulary(), PENDING).unwrap());

    let waiter = {
        let group = Arc::clone(&group);
        thread::spawn(move || group.wait(STOPPING, Some(Duration::from_secs(5))).unwrap())
    };

    group.replace(PENDING, RUNNING).unwrap();
    assert!(group.set(CANCELING).is_err());
    assert!(group.has(RUNNING));

    group.replace(RUNNING, STOPPING).unwrap();
    assert!(waiter.join().unwrap());
}
