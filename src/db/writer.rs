//! Batched SQLite writer for accepted indices
//!
//! Runs in a dedicated thread and receives records via a bounded channel,
//! so probe handlers never block on SQLite.
//!
//! # Performance Characteristics
//!
//! - Batched upserts inside one transaction per batch
//! - Prepared statements for minimal parsing overhead
//! - Single writer thread avoids SQLite contention

use crate::db::schema::{self, keys};
use crate::error::{DbError, DbResult};
use crate::job::JobId;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Idle wait before a partial batch is flushed
const IDLE_FLUSH: Duration = Duration::from_millis(100);

/// One accepted index
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// The probed index; primary key
    pub id: i64,

    /// Job that accepted it
    pub job_id: JobId,

    /// Opaque handler output
    pub payload: Option<String>,

    /// RFC 3339 timestamp
    pub fetched_at: String,
}

impl Record {
    pub fn new(id: i64, job_id: JobId) -> Self {
        Self {
            id,
            job_id,
            payload: None,
            fetched_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Message types sent to the writer thread
#[derive(Debug)]
pub enum WriterMessage {
    /// Upsert a record
    Record(Record),

    /// Store a run metadata value
    RunInfo { key: String, value: String },

    /// Flush pending writes
    Flush,

    /// Shutdown the writer
    Shutdown,
}

/// Statistics about write operations
#[derive(Debug, Default)]
pub struct WriterStats {
    /// Records received from handlers
    pub records_received: AtomicU64,

    /// Records upserted into the database
    pub records_written: AtomicU64,

    /// Total batches committed
    pub batches_committed: AtomicU64,
}

impl WriterStats {
    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn batches_committed(&self) -> u64 {
        self.batches_committed.load(Ordering::Relaxed)
    }
}

/// Handle for sending messages to the writer
#[derive(Clone)]
pub struct WriterHandle {
    sender: Sender<WriterMessage>,
    stats: Arc<WriterStats>,
    shutdown: Arc<AtomicBool>,
}

impl WriterHandle {
    /// Queue a record for upsert; blocks while the channel is full
    pub fn send_record(&self, record: Record) -> DbResult<()> {
        if self.is_shutdown() {
            return Err(DbError::ChannelClosed);
        }
        self.stats.records_received.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(WriterMessage::Record(record))
            .map_err(|_| DbError::ChannelClosed)
    }

    pub fn set_run_info(&self, key: &str, value: impl Into<String>) -> DbResult<()> {
        self.sender
            .send(WriterMessage::RunInfo {
                key: key.to_string(),
                value: value.into(),
            })
            .map_err(|_| DbError::ChannelClosed)
    }

    /// Request a flush of pending writes
    pub fn flush(&self) -> DbResult<()> {
        self.sender
            .send(WriterMessage::Flush)
            .map_err(|_| DbError::ChannelClosed)
    }

    /// Request shutdown (pending writes are flushed first)
    pub fn shutdown(&self) -> DbResult<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sender
            .send(WriterMessage::Shutdown)
            .map_err(|_| DbError::ChannelClosed)
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Upserting record writer that runs in its own thread
pub struct RecordWriter {
    handle: Option<JoinHandle<DbResult<()>>>,
    writer_handle: WriterHandle,
    db_path: PathBuf,
}

impl RecordWriter {
    /// Open (or create) the database and spawn the writer thread
    pub fn new(db_path: &Path, batch_size: usize, channel_size: usize) -> DbResult<Self> {
        let (sender, receiver) = bounded(channel_size);
        let stats = Arc::new(WriterStats::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let writer_handle = WriterHandle {
            sender,
            stats: Arc::clone(&stats),
            shutdown,
        };

        let conn = Connection::open(db_path)?;
        schema::create_database(&conn)?;
        schema::set_run_info(&conn, keys::SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
        schema::set_run_info(&conn, keys::FETCHER_VERSION, env!("CARGO_PKG_VERSION"))?;
        schema::set_run_info(&conn, keys::STATUS, "running")?;

        let handle = thread::Builder::new()
            .name("db-writer".into())
            .spawn(move || writer_thread(conn, receiver, stats, batch_size.max(1)))
            .map_err(|e| DbError::CreateFailed {
                path: db_path.to_path_buf(),
                reason: format!("Failed to spawn writer thread: {}", e),
            })?;

        debug!(path = %db_path.display(), batch_size, "Record writer started");
        Ok(Self {
            handle: Some(handle),
            writer_handle,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn handle(&self) -> WriterHandle {
        self.writer_handle.clone()
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Flush, index and mark the run completed
    pub fn finish(self) -> DbResult<()> {
        self.finalize("completed")
    }

    /// Flush, index and mark the run interrupted
    pub fn interrupt(self) -> DbResult<()> {
        self.finalize("interrupted")
    }

    fn finalize(mut self, status: &str) -> DbResult<()> {
        // The thread may already have exited on error; join reports it
        let _ = self.writer_handle.shutdown();

        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(DbError::WriterPanicked),
            }
        }

        let conn = Connection::open(&self.db_path)?;
        schema::create_indexes(&conn)?;
        schema::set_run_info(&conn, keys::STATUS, status)?;
        schema::optimize_for_reads(&conn)?;

        info!(
            path = %self.db_path.display(),
            records = self.writer_handle.stats().records_written(),
            status,
            "Record writer finished"
        );
        Ok(())
    }
}

fn writer_thread(
    conn: Connection,
    receiver: Receiver<WriterMessage>,
    stats: Arc<WriterStats>,
    batch_size: usize,
) -> DbResult<()> {
    let mut buffer: Vec<Record> = Vec::with_capacity(batch_size);

    loop {
        match receiver.recv_timeout(IDLE_FLUSH) {
            Ok(WriterMessage::Record(record)) => {
                buffer.push(record);
                if buffer.len() >= batch_size {
                    flush_records(&conn, &mut buffer, &stats)?;
                }
            }
            Ok(WriterMessage::RunInfo { key, value }) => {
                schema::set_run_info(&conn, &key, &value)?;
            }
            Ok(WriterMessage::Flush) => flush_records(&conn, &mut buffer, &stats)?,
            Ok(WriterMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                flush_records(&conn, &mut buffer, &stats)?;
                break;
            }
            Err(RecvTimeoutError::Timeout) => flush_records(&conn, &mut buffer, &stats)?,
        }
    }

    Ok(())
}

/// Upsert the buffer in one transaction
fn flush_records(conn: &Connection, buffer: &mut Vec<Record>, stats: &WriterStats) -> DbResult<()> {
    if buffer.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO records (id, job_id, payload, fetched_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                job_id = excluded.job_id,
                payload = excluded.payload,
                fetched_at = excluded.fetched_at",
        )?;

        for record in buffer.drain(..) {
            stmt.execute(params![
                record.id,
                record.job_id.as_u64() as i64,
                record.payload,
                record.fetched_at,
            ])?;
            stats.records_written.fetch_add(1, Ordering::Relaxed);
        }
    }
    tx.commit()?;
    stats.batches_committed.fetch_add(1, Ordering::Relaxed);

    Ok(())
}
