use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// Compute the next UTC occurrence of `expr` strictly after `after`.
///
/// Accepts classic 5-field crontab expressions (minute hour day-of-month
/// month day-of-week), 6/7-field expressions with a leading seconds
/// field (and optional trailing year), and descriptors like `@hourly`.
/// 5-field input is normalised by pinning seconds to 0, so "every
/// minute" fires on minute boundaries.
///
/// Returns `Ok(None)` when the expression has no future occurrence
/// (e.g. a fully-dated one-shot whose time has passed) — the caller
/// should park the job.
pub fn next_occurrence(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let normalised = normalise(expr);
    let schedule = Schedule::from_str(&normalised).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })?;
    Ok(schedule.after(&after).next())
}

/// Validate an expression without computing anything. Used when jobs
/// are added so bad expressions are rejected up front instead of
/// parking the job at its first completion.
pub fn validate(expr: &str) -> Result<()> {
    let normalised = normalise(expr);
    Schedule::from_str(&normalised).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Prepend a seconds field to 5-field crontab input; pass everything
/// else (descriptors, 6/7-field) through unchanged.
fn normalise(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.starts_with('@') {
        return trimmed.to_string();
    }
    if trimmed.split_whitespace().count() == 5 {
        return format!("0 {trimmed}");
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn five_field_every_minute_advances_to_minute_boundary() {
        let next = next_occurrence("* * * * *", at(12, 0, 10)).unwrap().unwrap();
        assert_eq!(next, at(12, 1, 0));
    }

    #[test]
    fn five_field_hourly_on_the_hour() {
        let next = next_occurrence("0 * * * *", at(12, 30, 0)).unwrap().unwrap();
        assert_eq!(next, at(13, 0, 0));
    }

    #[test]
    fn six_field_with_seconds_passes_through() {
        let next = next_occurrence("30 * * * * *", at(12, 0, 0)).unwrap().unwrap();
        assert_eq!(next, at(12, 0, 30));
    }

    #[test]
    fn descriptor_daily() {
        let next = next_occurrence("@daily", at(12, 0, 0)).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn dated_expression_in_the_past_has_no_occurrence() {
        // Midnight, 1 January 2020 — long gone relative to `after`.
        let next = next_occurrence("0 0 0 1 1 * 2020", at(0, 0, 0)).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            next_occurrence("every tuesday-ish", at(0, 0, 0)),
            Err(SchedulerError::InvalidCron { .. })
        ));
        assert!(validate("61 * * * *").is_err());
    }

    #[test]
    fn validate_accepts_all_supported_shapes() {
        validate("*/5 * * * *").unwrap();
        validate("0 0 12 * * *").unwrap();
        validate("@hourly").unwrap();
    }
}
