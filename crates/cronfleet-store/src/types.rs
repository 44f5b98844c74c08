use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `next_time`; claimable once it arrives.
    Waiting,
    /// Claimed by some scheduler instance. Claimable again only after
    /// the owner's lease expires.
    Running,
    /// Not scheduled. Terminal until explicitly resumed.
    Paused,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job record.
///
/// Timestamps are epoch milliseconds (UTC) so lease arithmetic is plain
/// integer math in both Rust and SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string — primary key.
    pub id: String,
    /// Human-readable key, unique. Local executors resolve their
    /// registered function by this name.
    pub name: String,
    /// Selects which executor variant runs this job (e.g. "local").
    pub executor_kind: String,
    /// Cron expression (5-field crontab, 6/7-field with seconds, or a
    /// descriptor like `@hourly`).
    pub cron_expr: String,
    /// Opaque payload handed to the executor; the scheduler never
    /// interprets it.
    pub config: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Next eligible run, epoch ms. Meaningful while `Waiting`.
    pub next_time_ms: i64,
    /// Last ownership heartbeat, epoch ms. The lease liveness signal
    /// while `Running`.
    pub update_time_ms: i64,
    /// Optimistic-concurrency token; bumped on every successful claim.
    pub version: i64,
    /// Creation time, epoch ms.
    pub created_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_roundtrip() {
        for status in [JobStatus::Waiting, JobStatus::Running, JobStatus::Paused] {
            assert_eq!(JobStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn status_rejects_unknown() {
        assert!(JobStatus::from_str("retired").is_err());
    }
}
