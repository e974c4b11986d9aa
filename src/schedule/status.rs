use chrono::{DateTime, Duration, Utc};

use crate::config::{DEFAULT_CURRENT_GRACE_MINUTES, DEFAULT_CURRENT_LEAD_MINUTES};
use crate::models::{DoseLog, OccurrenceStatus};

/// Proximity window around "now" in which an untaken dose is `current`.
///
/// `lead`: how far in the future a dose may be. `grace`: how far in the past
/// it may be before the past-due check turns it `missed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWindow {
    pub lead: Duration,
    pub grace: Duration,
}

impl Default for StatusWindow {
    fn default() -> Self {
        Self {
            lead: Duration::minutes(DEFAULT_CURRENT_LEAD_MINUTES),
            grace: Duration::minutes(DEFAULT_CURRENT_GRACE_MINUTES),
        }
    }
}

/// Classify one occurrence.
///
/// Evaluated in fixed order: taken, current, missed, upcoming. A taken log
/// wins regardless of how far the slot is from `now`.
pub fn classify_status(
    scheduled_time: DateTime<Utc>,
    log: Option<&DoseLog>,
    now: DateTime<Utc>,
    window: &StatusWindow,
) -> OccurrenceStatus {
    if log.is_some_and(DoseLog::is_taken) {
        return OccurrenceStatus::Taken;
    }

    let until = scheduled_time - now;
    if until <= window.lead && until >= -window.grace {
        return OccurrenceStatus::Current;
    }

    if scheduled_time < now {
        return OccurrenceStatus::Missed;
    }

    OccurrenceStatus::Upcoming
}
