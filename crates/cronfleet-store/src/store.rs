use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{Job, JobStatus};

/// Store operations the scheduler depends on. All mutations are atomic
/// with respect to concurrent callers; `claim` is additionally guarded
/// by a version CAS so racing instances cannot both win a job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Take ownership of one eligible job, transitioning it to
    /// `Running` and bumping `version`. `Ok(None)` means nothing is
    /// currently eligible — the expected steady state, not an error.
    async fn claim(&self) -> Result<Option<Job>>;

    /// Heartbeat: stamp `update_time` to keep the caller's lease alive.
    /// May race benignly with a reclaim after lease expiry.
    async fn renew_lease(&self, id: &str) -> Result<()>;

    /// Voluntarily hand a `Running` job back to `Waiting` without
    /// changing its schedule (shutdown path).
    async fn release(&self, id: &str) -> Result<()>;

    /// `Running → Waiting` with a new `next_time`.
    async fn reschedule(&self, id: &str, next_time_ms: i64) -> Result<()>;

    /// Park the job: status `Paused`, `next_time` untouched.
    async fn stop(&self, id: &str) -> Result<()>;
}

/// SQLite-backed job store.
///
/// Wraps the connection in a `Mutex` so multiple handles (and the
/// scheduler's detached execution tasks) can share one database file.
/// The CAS claim works across processes too — any number of scheduler
/// instances may point at the same file or, with a different backend
/// implementing [`JobStore`], the same table.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
    lease_timeout: Duration,
}

impl SqliteJobStore {
    /// Open over an existing connection, initialising the schema.
    pub fn new(conn: Connection, lease_timeout: Duration) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            lease_timeout,
        })
    }

    /// Share an already-initialised connection between handles.
    pub fn shared(conn: Arc<Mutex<Connection>>, lease_timeout: Duration) -> Self {
        Self {
            conn,
            lease_timeout,
        }
    }

    /// Insert a new job in `Waiting` state. `next_time_ms` is the first
    /// eligible run (callers compute it from the cron expression, or
    /// pass "now" for run-immediately semantics).
    pub fn add_job(
        &self,
        name: &str,
        executor_kind: &str,
        cron_expr: &str,
        config: &str,
        next_time_ms: i64,
    ) -> Result<Job> {
        let now = Utc::now().timestamp_millis();
        let id = Uuid::new_v4().to_string();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs
             (id, name, executor_kind, cron_expr, config, status,
              next_time, update_time, version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'waiting', ?6, ?7, 0, ?7)",
            rusqlite::params![id, name, executor_kind, cron_expr, config, next_time_ms, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::DuplicateName {
                    name: name.to_string(),
                }
            }
            other => StoreError::Database(other),
        })?;

        debug!(job_id = %id, %name, "job added");
        Ok(Job {
            id,
            name: name.to_string(),
            executor_kind: executor_kind.to_string(),
            cron_expr: cron_expr.to_string(),
            config: config.to_string(),
            status: JobStatus::Waiting,
            next_time_ms,
            update_time_ms: now,
            version: 0,
            created_at_ms: now,
        })
    }

    /// Fetch a job by ID.
    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// All jobs ordered by creation time.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at"))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Park a job regardless of current state.
    pub fn pause(&self, id: &str) -> Result<()> {
        self.set_status(id, JobStatus::Paused)
    }

    /// Resume a paused job with a fresh `next_time`.
    pub fn resume(&self, id: &str, next_time_ms: i64) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs SET status = 'waiting', next_time = ?2, update_time = ?3
             WHERE id = ?1",
            rusqlite::params![id, next_time_ms, now],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn set_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs SET status = ?2, update_time = ?3 WHERE id = ?1",
            rusqlite::params![id, status.to_string(), now],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// One selection pass: the oldest eligible job, or `None`.
    ///
    /// Eligible means due (`waiting` with `next_time` arrived) or
    /// abandoned (`running` with a heartbeat older than the lease
    /// timeout).
    fn select_eligible(&self, conn: &Connection, now_ms: i64) -> Result<Option<Job>> {
        let lease_deadline = now_ms - self.lease_timeout.as_millis() as i64;
        let job = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE (status = 'waiting' AND next_time <= ?1)
                        OR (status = 'running' AND update_time < ?2)
                     ORDER BY next_time ASC
                     LIMIT 1"
                ),
                rusqlite::params![now_ms, lease_deadline],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// The CAS write: succeeds only if `candidate.version` still matches.
    fn try_claim(&self, conn: &Connection, candidate: &Job, now_ms: i64) -> Result<bool> {
        let n = conn.execute(
            "UPDATE jobs SET status = 'running', update_time = ?3, version = version + 1
             WHERE id = ?1 AND version = ?2",
            rusqlite::params![candidate.id, candidate.version, now_ms],
        )?;
        Ok(n == 1)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn claim(&self) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        loop {
            let now_ms = Utc::now().timestamp_millis();
            let Some(candidate) = self.select_eligible(&conn, now_ms)? else {
                return Ok(None);
            };
            if self.try_claim(&conn, &candidate, now_ms)? {
                debug!(job_id = %candidate.id, name = %candidate.name, "job claimed");
                return Ok(Some(Job {
                    status: JobStatus::Running,
                    update_time_ms: now_ms,
                    version: candidate.version + 1,
                    ..candidate
                }));
            }
            // Lost the CAS to a racing claimant. Re-run the whole
            // selection: the next eligible job may differ now.
            debug!(job_id = %candidate.id, "claim race lost, reselecting");
        }
    }

    async fn renew_lease(&self, id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs SET update_time = ?2 WHERE id = ?1",
            rusqlite::params![id, now],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<()> {
        self.set_status(id, JobStatus::Waiting)
    }

    async fn reschedule(&self, id: &str, next_time_ms: i64) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs SET status = 'waiting', next_time = ?2, update_time = ?3
             WHERE id = ?1",
            rusqlite::params![id, next_time_ms, now],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.set_status(id, JobStatus::Paused)
    }
}

const JOB_COLUMNS: &str = "id, name, executor_kind, cron_expr, config, status, \
                           next_time, update_time, version, created_at";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let status_str: String = row.get(5)?;
    let status = status_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        executor_kind: row.get(2)?,
        cron_expr: row.get(3)?,
        config: row.get(4)?,
        status,
        next_time_ms: row.get(6)?,
        update_time_ms: row.get(7)?,
        version: row.get(8)?,
        created_at_ms: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(180);

    fn store() -> SqliteJobStore {
        SqliteJobStore::new(Connection::open_in_memory().unwrap(), LEASE).unwrap()
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    #[tokio::test]
    async fn claim_returns_none_when_empty() {
        let s = store();
        assert!(s.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_due_waiting_job() {
        let s = store();
        let added = s
            .add_job("cleanup", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();

        let claimed = s.claim().await.unwrap().expect("due job should be claimed");
        assert_eq!(claimed.id, added.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.version, added.version + 1);

        let stored = s.get(&added.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.version, added.version + 1);
    }

    #[tokio::test]
    async fn future_waiting_job_is_not_claimed() {
        let s = store();
        s.add_job("later", "local", "0 * * * * *", "", now_ms() + 60_000)
            .unwrap();
        assert!(s.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn paused_job_is_not_claimed() {
        let s = store();
        let j = s
            .add_job("parked", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();
        s.pause(&j.id).unwrap();
        assert!(s.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lease_expired_running_job_is_reclaimable() {
        let s = store();
        let j = s
            .add_job("stuck", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();
        let first = s.claim().await.unwrap().unwrap();
        assert_eq!(first.id, j.id);

        // Still within the lease: not eligible.
        assert!(s.claim().await.unwrap().is_none());

        // Backdate the heartbeat past the lease timeout — crashed owner.
        {
            let conn = s.conn.lock().unwrap();
            conn.execute(
                "UPDATE jobs SET update_time = ?2 WHERE id = ?1",
                rusqlite::params![j.id, now_ms() - LEASE.as_millis() as i64 - 1_000],
            )
            .unwrap();
        }

        let reclaimed = s.claim().await.unwrap().expect("expired lease reclaimable");
        assert_eq!(reclaimed.id, j.id);
        assert_eq!(reclaimed.version, first.version + 1);
    }

    #[tokio::test]
    async fn stale_cas_write_loses() {
        let s = store();
        let j = s
            .add_job("contested", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();

        // A racing claimant bumps the version after our read.
        {
            let conn = s.conn.lock().unwrap();
            conn.execute(
                "UPDATE jobs SET version = version + 1 WHERE id = ?1",
                [&j.id],
            )
            .unwrap();
        }

        let conn = s.conn.lock().unwrap();
        // The write conditioned on the stale version must not land.
        assert!(!s.try_claim(&conn, &j, now_ms()).unwrap());
    }

    #[tokio::test]
    async fn lost_race_retries_selection_and_claims_current_version() {
        let s = store();
        let j = s
            .add_job("contested", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();

        // Simulate a concurrent writer having bumped the version; the
        // claim loop must reselect and win against the *current* token.
        {
            let conn = s.conn.lock().unwrap();
            conn.execute(
                "UPDATE jobs SET version = version + 3 WHERE id = ?1",
                [&j.id],
            )
            .unwrap();
        }

        let claimed = s.claim().await.unwrap().unwrap();
        assert_eq!(claimed.id, j.id);
        assert_eq!(claimed.version, j.version + 4);
    }

    #[tokio::test]
    async fn racing_handles_claim_distinct_jobs() {
        let conn = Connection::open_in_memory().unwrap();
        let a = SqliteJobStore::new(conn, LEASE).unwrap();
        let b = SqliteJobStore::shared(Arc::clone(&a.conn), LEASE);

        a.add_job("j1", "local", "0 * * * * *", "", now_ms() - 2)
            .unwrap();
        a.add_job("j2", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();

        let first = a.claim().await.unwrap().unwrap();
        let second = b.claim().await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert!(b.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn renew_lease_touches_heartbeat_only() {
        let s = store();
        let j = s
            .add_job("beat", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();
        let claimed = s.claim().await.unwrap().unwrap();

        // Backdate, then renew.
        {
            let conn = s.conn.lock().unwrap();
            conn.execute(
                "UPDATE jobs SET update_time = 0 WHERE id = ?1",
                [&j.id],
            )
            .unwrap();
        }
        s.renew_lease(&j.id).await.unwrap();

        let stored = s.get(&j.id).unwrap().unwrap();
        assert!(stored.update_time_ms > 0);
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.version, claimed.version);
    }

    #[tokio::test]
    async fn reschedule_returns_job_to_waiting() {
        let s = store();
        let j = s
            .add_job("again", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();
        s.claim().await.unwrap().unwrap();

        let next = now_ms() + 60_000;
        s.reschedule(&j.id, next).await.unwrap();

        let stored = s.get(&j.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Waiting);
        assert_eq!(stored.next_time_ms, next);
    }

    #[tokio::test]
    async fn stop_parks_job_and_keeps_next_time() {
        let s = store();
        let j = s
            .add_job("oneshot", "local", "0 0 0 1 1 * 2020", "", now_ms() - 1)
            .unwrap();
        let before = s.get(&j.id).unwrap().unwrap().next_time_ms;
        s.claim().await.unwrap().unwrap();

        s.stop(&j.id).await.unwrap();
        let stored = s.get(&j.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Paused);
        assert_eq!(stored.next_time_ms, before);
    }

    #[tokio::test]
    async fn release_hands_job_back_without_touching_schedule() {
        let s = store();
        let j = s
            .add_job("yield", "local", "0 * * * * *", "", now_ms() - 1)
            .unwrap();
        let next_before = j.next_time_ms;
        s.claim().await.unwrap().unwrap();

        s.release(&j.id).await.unwrap();
        let stored = s.get(&j.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Waiting);
        assert_eq!(stored.next_time_ms, next_before);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let s = store();
        s.add_job("unique", "local", "0 * * * * *", "", now_ms())
            .unwrap();
        let err = s
            .add_job("unique", "local", "0 * * * * *", "", now_ms())
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName { .. }));
    }

    #[test]
    fn pause_resume_roundtrip() {
        let s = store();
        let j = s
            .add_job("toggled", "local", "0 * * * * *", "", now_ms())
            .unwrap();
        s.pause(&j.id).unwrap();
        assert_eq!(s.get(&j.id).unwrap().unwrap().status, JobStatus::Paused);

        let next = now_ms() + 5_000;
        s.resume(&j.id, next).unwrap();
        let stored = s.get(&j.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Waiting);
        assert_eq!(stored.next_time_ms, next);
    }

    #[tokio::test]
    async fn unknown_id_errors() {
        let s = store();
        assert!(matches!(
            s.renew_lease("missing").await.unwrap_err(),
            StoreError::JobNotFound { .. }
        ));
        assert!(matches!(
            s.stop("missing").await.unwrap_err(),
            StoreError::JobNotFound { .. }
        ));
    }
}
