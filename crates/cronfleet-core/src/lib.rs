//! `cronfleet-core` — shared configuration for the cronfleet workspace.
//!
//! Every scheduler process loads the same [`config::CronfleetConfig`]
//! (TOML file + `CRONFLEET_*` env overrides). The tunables here are
//! deployment parameters, not protocol constants: different fleets may
//! run with different lease timeouts as long as all instances sharing a
//! job store agree on one.

pub mod config;
pub mod error;

pub use config::CronfleetConfig;
pub use error::{CoreError, Result};
