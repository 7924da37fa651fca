//! Tick schedule.

use std::str::FromStr;
use std::time::Duration;

use super::SchedulerError;

/// Minimum allowed interval (1 second).
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// When the scheduler fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval counted from scheduler start.
    Interval(Duration),

    /// Cron expression, `sec min hour day month weekday` (6-field).
    /// Example: `"0 */5 * * * *"` = every 5 minutes at second 0
    Cron(String),
}

impl Schedule {
    /// Create an interval schedule, clamped to [`MIN_INTERVAL`].
    pub fn interval(duration: Duration) -> Self {
        if duration < MIN_INTERVAL {
            tracing::warn!(min_interval = ?MIN_INTERVAL,
                "Interval duration is less than minimum allowed. Using minimum duration."
            );
            Self::Interval(MIN_INTERVAL)
        } else {
            Self::Interval(duration)
        }
    }

    /// Create a cron schedule with immediate validation.
    ///
    /// # Errors
    /// Returns `SchedulerError::InvalidSchedule` if the expression does not parse.
    pub fn cron(expr: impl AsRef<str>) -> Result<Self, SchedulerError> {
        let expr = expr.as_ref();
        cron::Schedule::from_str(expr)
            .map_err(|e| SchedulerError::InvalidSchedule(format!("{expr}: {e}")))?;
        Ok(Self::Cron(expr.to_string()))
    }

    /// Wall-clock aligned schedule for `interval`.
    ///
    /// Whole-second intervals dividing a minute fire on matching seconds,
    /// whole-minute intervals dividing an hour fire on matching minutes at
    /// second 0. Anything else repeats from scheduler start.
    pub fn aligned(interval: Duration) -> Self {
        let secs = interval.as_secs();
        if interval.subsec_nanos() != 0 || secs == 0 {
            return Self::interval(interval);
        }

        if secs < 60 && 60 % secs == 0 {
            return Self::Cron(format!("*/{secs} * * * * *"));
        }

        let minutes = secs / 60;
        if secs % 60 == 0 && minutes < 60 && 60 % minutes == 0 {
            return Self::Cron(format!("0 */{minutes} * * * *"));
        }
        if secs == 3600 {
            return Self::Cron("0 0 * * * *".to_string());
        }

        Self::interval(interval)
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval(d) => write!(f, "every {}", humantime::format_duration(*d)),
            Self::Cron(expr) => write!(f, "cron: {}", expr),
        }
    }
}
