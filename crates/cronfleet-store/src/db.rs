use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job table in `conn`.
///
/// Creates the `jobs` table (idempotent) and the index backing the
/// eligibility query, so polling stays cheap with thousands of jobs.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id            TEXT    NOT NULL PRIMARY KEY,
            name          TEXT    NOT NULL UNIQUE,
            executor_kind TEXT    NOT NULL,
            cron_expr     TEXT    NOT NULL,
            config        TEXT    NOT NULL DEFAULT '',  -- opaque payload
            status        TEXT    NOT NULL DEFAULT 'waiting',
            next_time     INTEGER NOT NULL,             -- epoch ms
            update_time   INTEGER NOT NULL,             -- epoch ms, lease heartbeat
            version       INTEGER NOT NULL DEFAULT 0,   -- CAS token
            created_at    INTEGER NOT NULL              -- epoch ms
        ) STRICT;

        -- Eligibility scan: status = 'waiting' AND next_time <= now
        CREATE INDEX IF NOT EXISTS idx_jobs_status_next_time
            ON jobs (status, next_time);
        ",
    )?;
    Ok(())
}
