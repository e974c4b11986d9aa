//! Adherence summary for the home dashboard: today's logs, the current
//! streak of clean days, and pills consumed.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, TimeZone};
use serde::Serialize;

use crate::models::{DoseLog, DoseOccurrence, LogStatus, Medication, OccurrenceStatus};

/// Days looked back when counting a streak.
pub const MAX_STREAK_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdherenceSummary {
    pub today: NaiveDate,
    pub today_logs: Vec<DoseLog>,
    pub streak_days: u32,
    pub total_pills_taken: u32,
}

/// Build the summary.
///
/// A day extends the streak when it has at least one log, no log marked
/// missed, and no reconciled occurrence that is missed. Counting starts
/// today and stops at the first day that fails.
pub fn adherence_summary<Tz: TimeZone>(
    medications: &[Medication],
    logs: &[DoseLog],
    occurrences: &[DoseOccurrence],
    now: &DateTime<Tz>,
) -> AdherenceSummary {
    let tz = now.timezone();
    let today = now.date_naive();
    let local_day = |at: &DateTime<chrono::Utc>| at.with_timezone(&tz).date_naive();

    let mut by_day: BTreeMap<NaiveDate, Vec<&DoseLog>> = BTreeMap::new();
    for log in logs {
        by_day.entry(local_day(&log.scheduled_time)).or_default().push(log);
    }

    let missed_days: HashSet<NaiveDate> = occurrences
        .iter()
        .filter(|o| o.status == OccurrenceStatus::Missed)
        .map(|o| local_day(&o.scheduled_time))
        .collect();

    let mut streak_days = 0;
    for offset in 0..MAX_STREAK_DAYS {
        let day = today - Duration::days(offset);
        let Some(day_logs) = by_day.get(&day) else {
            break;
        };
        if day_logs.iter().any(|l| l.status == LogStatus::Missed) || missed_days.contains(&day) {
            break;
        }
        streak_days += 1;
    }

    let mut today_logs: Vec<DoseLog> = by_day
        .get(&today)
        .map(|logs| logs.iter().map(|l| (*l).clone()).collect())
        .unwrap_or_default();
    today_logs.sort_by_key(|l| l.scheduled_time);

    AdherenceSummary {
        today,
        today_logs,
        streak_days,
        total_pills_taken: medications
            .iter()
            .filter(|m| m.is_active)
            .map(Medication::pills_taken)
            .sum(),
    }
}
