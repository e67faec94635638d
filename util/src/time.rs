//! General time utility functions

use chrono;
use std::time::Duration;
use thiserror::Error;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Longest period accepted from a parameter file, one day
pub const MAX_PERIOD_S: f64 = 86_400.0;

/// Errors converting a number of seconds into a period.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum PeriodError {
    #[error("{0} s is not a positive number of seconds")]
    NotPositive(f64),

    #[error("{0} s is longer than the maximum of {} s", MAX_PERIOD_S)]
    TooLong(f64),
}

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert a number of seconds into a period.
///
/// The value must be positive and no longer than [`MAX_PERIOD_S`], `NaN` and infinities are
/// rejected.
pub fn seconds_to_period(seconds: f64) -> Result<Duration, PeriodError> {
    if seconds.is_nan() || seconds <= 0.0 {
        return Err(PeriodError::NotPositive(seconds))
    }
    if seconds > MAX_PERIOD_S {
        return Err(PeriodError::TooLong(seconds))
    }

    Duration::try_from_secs_f64(seconds).map_err(|_| PeriodError::NotPositive(seconds))
}

/// Convert a number of seconds into a period no shorter than `min`.
///
/// Never panics: values too long for a period saturate at [`MAX_PERIOD_S`], anything else which
/// isn't a valid period gives `min`.
pub fn seconds_to_period_or(seconds: f64, min: Duration) -> Duration {
    match seconds_to_period(seconds) {
        Ok(d) => d.max(min),
        Err(PeriodError::TooLong(_)) => Duration::from_secs(MAX_PERIOD_S as u64),
        Err(PeriodError::NotPositive(_)) => min
    }
}
