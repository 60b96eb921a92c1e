//! Database schema definitions and creation
//!
//! One row per accepted index, keyed by the index itself, plus a small
//! key/value table describing the run.

use crate::error::DbResult;
use rusqlite::Connection;

/// Current schema version for migrations
pub const SCHEMA_VERSION: u32 = 1;

/// Accepted indices. `id` is the probed index, so re-fetching overwrites.
const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    job_id INTEGER NOT NULL,
    payload TEXT,
    fetched_at TEXT NOT NULL      -- RFC 3339
)
"#;

const CREATE_RUN_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS run_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_records_job ON records(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_records_fetched ON records(fetched_at)",
];

/// SQLite pragmas for write throughput
const WRITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = OFF;
PRAGMA cache_size = -64000;      -- 64MB cache
PRAGMA temp_store = MEMORY;
PRAGMA wal_autocheckpoint = 10000;
"#;

/// Applied once the run is over
const READ_PRAGMAS: &str = r#"
PRAGMA synchronous = FULL;
"#;

/// Create and configure a new database for writing
pub fn create_database(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(WRITE_PRAGMAS)?;
    conn.execute(CREATE_RECORDS_TABLE, [])?;
    conn.execute(CREATE_RUN_INFO_TABLE, [])?;
    Ok(())
}

/// Create indexes (after the run, so inserts stay cheap)
pub fn create_indexes(conn: &Connection) -> DbResult<()> {
    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }
    Ok(())
}

/// Apply read-optimized settings
pub fn optimize_for_reads(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(READ_PRAGMAS)?;
    conn.execute("ANALYZE", [])?;
    Ok(())
}

/// Store run metadata
pub fn set_run_info(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO run_info (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}

/// Get run metadata
pub fn get_run_info(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let result = conn.query_row(
        "SELECT value FROM run_info WHERE key = ?1",
        [key],
        |row| row.get(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Metadata keys written by the fetcher binary
pub mod keys {
    /// Range as `begin..=end step s`
    pub const SPAN: &str = "span";

    /// Normalized weights, JSON array
    pub const WEIGHTS: &str = "weights";

    /// Timestamp when the run started (RFC 3339)
    pub const START_TIME: &str = "start_time";

    /// Timestamp when the run ended (RFC 3339)
    pub const END_TIME: &str = "end_time";

    pub const DURATION_SECS: &str = "duration_secs";

    pub const JOB_COUNT: &str = "job_count";

    /// Handler invocations
    pub const TOTAL_PROBES: &str = "total_probes";

    pub const TOTAL_ACCEPTED: &str = "total_accepted";

    pub const ERROR_COUNT: &str = "error_count";

    pub const SCHEMA_VERSION: &str = "schema_version";

    pub const FETCHER_VERSION: &str = "fetcher_version";

    /// Run status: "running", "completed", "interrupted"
    pub const STATUS: &str = "status";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_database() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('records', 'run_info')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_run_info() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();

        set_run_info(&conn, keys::STATUS, "running").unwrap();
        set_run_info(&conn, keys::STATUS, "completed").unwrap();

        assert_eq!(
            get_run_info(&conn, keys::STATUS).unwrap(),
            Some("completed".to_string())
        );
        assert_eq!(get_run_info(&conn, "nonexistent").unwrap(), None);
    }

    #[test]
    fn test_create_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        create_database(&conn).unwrap();
        create_indexes(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name LIKE 'idx_records_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
