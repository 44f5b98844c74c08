//! `cronfleet-store` — the shared job table and the claim protocol.
//!
//! # Overview
//!
//! Jobs live in a single SQLite `jobs` table shared by every scheduler
//! instance. Ownership is decided by optimistic concurrency: a claim
//! reads an eligible row, then writes `status = running` conditioned on
//! the `version` it observed (`UPDATE … WHERE id = ? AND version = ?`).
//! At most one racing claimant wins; losers re-run the selection.
//!
//! # Eligibility
//!
//! A job can be claimed when either
//! - `status = waiting` and `next_time` has arrived, or
//! - `status = running` but its owner has not heartbeated within the
//!   lease timeout (the self-healing path for crashed owners).
//!
//! There is no fencing on heartbeat/reschedule writes after a reclaim:
//! the later writer wins. That gives at-most-one-*likely* execution,
//! not exactly-once.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::{JobStore, SqliteJobStore};
pub use types::{Job, JobStatus};
