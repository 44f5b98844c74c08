//! `cronfleet-scheduler` — the claim/execute/reschedule control loop.
//!
//! # Overview
//!
//! Each scheduler process runs one [`engine::Scheduler`] polling loop:
//!
//! 1. take a permit from the bounded concurrency limiter,
//! 2. claim one eligible job from the shared [`JobStore`](cronfleet_store::JobStore)
//!    (version CAS, short independent timeout),
//! 3. resolve the job's executor by `executor_kind`,
//! 4. detach an execution task that heartbeats the lease while the
//!    executor runs, then reschedules the job to its next cron
//!    occurrence (or pauses it when none exists).
//!
//! Per-job failures are logged and contained; only cancellation of the
//! outer token stops the loop. Executors that ignore cancellation are
//! never force-killed — their jobs stay `Running` until they return or
//! the lease expires and another instance reclaims them.

pub mod engine;
pub mod error;
pub mod executor;
pub mod lease;
pub mod schedule;

pub use engine::{Scheduler, SchedulerOptions};
pub use error::{Result, SchedulerError};
pub use executor::{ExecuteError, Executor, LocalFuncExecutor};
pub use lease::ClaimedJob;
pub use schedule::next_occurrence;
