use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ScheduleError;
use crate::models::{Medication, OccurrenceId, ScheduledDose};

/// A validated wall-clock time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSlot {
    hour: u32,
    minute: u32,
}

impl TimeSlot {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ScheduleError> {
        if hour > 23 || minute > 59 {
            return Err(ScheduleError::InvalidTimeSlot(format!("{hour}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    /// Parse "HH:MM" (a single-digit hour is accepted).
    pub fn parse(raw: &str) -> Result<Self, ScheduleError> {
        let invalid = || ScheduleError::InvalidTimeSlot(raw.to_string());
        let (h, m) = raw.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        if !h.chars().chain(m.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

/// Parse and check a medication's slots.
///
/// Slots must be well-formed and listed in non-decreasing order. Equal
/// neighbours pass: duplicates are the directory's problem, not ours.
/// The inventory counts must also be consistent.
pub fn validate_time_slots(medication: &Medication) -> Result<Vec<TimeSlot>, ScheduleError> {
    if medication.remaining_pills > medication.total_pills {
        return Err(ScheduleError::InvalidPillCount {
            remaining: medication.remaining_pills,
            total: medication.total_pills,
        });
    }

    let slots = medication
        .time_slots
        .iter()
        .map(|raw| TimeSlot::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, pair) in slots.windows(2).enumerate() {
        if pair[1] < pair[0] {
            return Err(ScheduleError::NonMonotonicSlots {
                earlier: medication.time_slots[i].clone(),
                later: medication.time_slots[i + 1].clone(),
            });
        }
    }

    Ok(slots)
}

/// A medication left out of generation, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedMedication {
    pub medication_id: Uuid,
    pub name: String,
    pub reason: String,
}

/// Generator output: the doses, plus whatever could not be expanded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GeneratedSchedule {
    pub doses: Vec<ScheduledDose>,
    pub rejected: Vec<RejectedMedication>,
}

/// Expand every medication's slots onto each calendar day in
/// `[today - window_days, today + window_days]`, where "today" is the local
/// date of `now` in its own time zone.
///
/// Output is sorted by scheduled time, ties keeping medication order.
pub fn generate_occurrences<Tz: TimeZone>(
    medications: &[Arc<Medication>],
    now: &DateTime<Tz>,
    window_days: i64,
) -> GeneratedSchedule {
    let tz = now.timezone();
    let today = now.date_naive();
    let mut rejected = Vec::new();
    let mut keyed: Vec<(DateTime<Utc>, usize, ScheduledDose)> = Vec::new();

    for (index, medication) in medications.iter().enumerate() {
        let slots = match validate_time_slots(medication) {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(
                    medication_id = %medication.id,
                    error = %e,
                    "Skipping medication with invalid schedule"
                );
                rejected.push(RejectedMedication {
                    medication_id: medication.id,
                    name: medication.name.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        for offset in -window_days..=window_days {
            let day = today + Duration::days(offset);
            for slot in &slots {
                let local = day.and_time(slot.as_naive_time());
                let Some(scheduled_time) = resolve_local(&tz, local) else {
                    tracing::warn!(
                        medication_id = %medication.id,
                        local = %local,
                        "Slot does not exist in local time, skipped"
                    );
                    continue;
                };
                keyed.push((
                    scheduled_time,
                    index,
                    ScheduledDose {
                        id: OccurrenceId::new(&medication.id, &scheduled_time),
                        medication: Arc::clone(medication),
                        scheduled_time,
                    },
                ));
            }
        }
    }

    // Stable: equal (time, medication) keys keep their slot order.
    keyed.sort_by_key(|(time, index, _)| (*time, *index));

    GeneratedSchedule {
        doses: keyed.into_iter().map(|(_, _, dose)| dose).collect(),
        rejected,
    }
}

/// Map a local wall-clock time to an instant. Ambiguous times (DST fall-back)
/// take the earlier instant; times inside a DST gap move forward one hour.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};
    use std::collections::HashSet;

    fn med(name: &str, slots: &[&str]) -> Arc<Medication> {
        Arc::new(Medication {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            name: name.into(),
            dosage: "10mg".into(),
            frequency: "daily".into(),
            time_slots: slots.iter().map(|s| s.to_string()).collect(),
            remaining_pills: 30,
            total_pills: 30,
            is_active: true,
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 8, 5, 0).unwrap()
    }

    #[test]
    fn parses_valid_slots() {
        assert_eq!(TimeSlot::parse("08:00").unwrap(), TimeSlot::new(8, 0).unwrap());
        assert_eq!(TimeSlot::parse("8:30").unwrap(), TimeSlot::new(8, 30).unwrap());
        assert_eq!(TimeSlot::parse(" 23:59 ").unwrap(), TimeSlot::new(23, 59).unwrap());
    }

    #[test]
    fn rejects_malformed_slots() {
        for raw in ["24:00", "12:60", "noon", "12", "12:5", "-1:00", "1:2:3", ""] {
            assert!(TimeSlot::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn fifteen_days_per_slot() {
        let meds = vec![med("Metformin", &["08:00", "20:00"]), med("Aspirin", &["12:00"])];
        let schedule = generate_occurrences(&meds, &now(), 7);
        assert_eq!(schedule.doses.len(), 15 * 3);
        assert!(schedule.rejected.is_empty());

        let unique: HashSet<_> = schedule
            .doses
            .iter()
            .map(|d| (d.medication.id, d.scheduled_time))
            .collect();
        assert_eq!(unique.len(), schedule.doses.len());
        assert!(schedule
            .doses
            .windows(2)
            .all(|w| w[0].scheduled_time <= w[1].scheduled_time));
    }

    #[test]
    fn window_covers_whole_calendar_days() {
        let meds = vec![med("Metformin", &["00:00", "23:59"])];
        let schedule = generate_occurrences(&meds, &now(), 7);
        let first = schedule.doses.first().unwrap().scheduled_time;
        let last = schedule.doses.last().unwrap().scheduled_time;
        assert_eq!(first, Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap());
        assert_eq!(last, Utc.with_ymd_and_hms(2026, 3, 17, 23, 59, 0).unwrap());
    }

    #[test]
    fn slots_use_local_wall_clock() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let local_now = tz.with_ymd_and_hms(2026, 3, 10, 8, 5, 0).unwrap();
        let meds = vec![med("Lisinopril", &["08:00"])];
        let schedule = generate_occurrences(&meds, &local_now, 0);
        assert_eq!(schedule.doses.len(), 1);
        let dose = &schedule.doses[0];
        assert_eq!(dose.scheduled_time, Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap());
        assert_eq!(dose.scheduled_time.second(), 0);
    }

    #[test]
    fn ties_follow_medication_order() {
        let first = med("First", &["09:00"]);
        let second = med("Second", &["09:00"]);
        let meds = vec![first.clone(), second.clone()];
        let schedule = generate_occurrences(&meds, &now(), 1);
        for pair in schedule.doses.chunks(2) {
            assert_eq!(pair[0].scheduled_time, pair[1].scheduled_time);
            assert_eq!(pair[0].medication.id, first.id);
            assert_eq!(pair[1].medication.id, second.id);
        }
    }

    #[test]
    fn empty_slots_contribute_nothing() {
        let meds = vec![med("As needed", &[])];
        let schedule = generate_occurrences(&meds, &now(), 7);
        assert!(schedule.doses.is_empty());
        assert!(schedule.rejected.is_empty());
    }

    #[test]
    fn duplicate_slots_not_deduplicated() {
        let meds = vec![med("Twice", &["08:00", "08:00"])];
        let schedule = generate_occurrences(&meds, &now(), 0);
        assert_eq!(schedule.doses.len(), 2);
        assert_eq!(schedule.doses[0].id, schedule.doses[1].id);
    }

    #[test]
    fn invalid_medication_rejected_rest_unaffected() {
        let bad = med("Broken", &["08:00", "25:00"]);
        let unordered = med("Unordered", &["20:00", "08:00"]);
        let good = med("Good", &["08:00"]);
        let meds = vec![bad.clone(), unordered.clone(), good.clone()];
        let schedule = generate_occurrences(&meds, &now(), 7);

        assert_eq!(schedule.doses.len(), 15);
        assert!(schedule.doses.iter().all(|d| d.medication.id == good.id));
        assert_eq!(schedule.rejected.len(), 2);
        assert_eq!(schedule.rejected[0].medication_id, bad.id);
        assert!(schedule.rejected[0].reason.contains("25:00"));
        assert_eq!(schedule.rejected[1].medication_id, unordered.id);
    }

    #[test]
    fn validate_reports_out_of_order_pair() {
        let unordered = med("Unordered", &["08:00", "20:00", "12:00"]);
        let err = validate_time_slots(&unordered).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::NonMonotonicSlots {
                earlier: "20:00".into(),
                later: "12:00".into(),
            }
        );
    }

    #[test]
    fn inconsistent_inventory_rejected() {
        let mut broken = (*med("Overfilled", &["08:00"])).clone();
        broken.remaining_pills = 31;
        assert_eq!(
            validate_time_slots(&broken).unwrap_err(),
            ScheduleError::InvalidPillCount { remaining: 31, total: 30 }
        );
    }

    #[test]
    fn generation_does_not_mutate_input() {
        let meds = vec![med("Metformin", &["08:00"])];
        let before = (*meds[0]).clone();
        let _ = generate_occurrences(&meds, &now(), 7);
        assert_eq!(*meds[0], before);
    }

    // America/New_York springs forward on 2026-03-08 (02:00 -> 03:00) and
    // falls back on 2026-11-01 (02:00 -> 01:00).

    #[test]
    fn slot_in_spring_forward_gap_moves_one_hour_later() {
        let tz = chrono_tz::America::New_York;
        let now = tz.with_ymd_and_hms(2026, 3, 8, 12, 0, 0).unwrap();
        let schedule = generate_occurrences(&[med("Levothyroxine", &["02:30"])], &now, 0);

        assert_eq!(schedule.doses.len(), 1);
        let dose = &schedule.doses[0];
        // 03:30 EDT
        assert_eq!(dose.scheduled_time, Utc.with_ymd_and_hms(2026, 3, 8, 7, 30, 0).unwrap());
        assert_eq!(dose.scheduled_time.with_timezone(&tz).hour(), 3);
    }

    #[test]
    fn ambiguous_fall_back_slot_takes_earlier_instant() {
        let tz = chrono_tz::America::New_York;
        let now = tz.with_ymd_and_hms(2026, 11, 1, 12, 0, 0).unwrap();
        let schedule = generate_occurrences(&[med("Levothyroxine", &["01:30"])], &now, 0);

        assert_eq!(schedule.doses.len(), 1);
        // 01:30 EDT, not 01:30 EST (06:30 UTC)
        assert_eq!(
            schedule.doses[0].scheduled_time,
            Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap()
        );
    }

    #[test]
    fn window_across_dst_change_keeps_one_dose_per_day() {
        let tz = chrono_tz::America::New_York;
        let now = tz.with_ymd_and_hms(2026, 3, 8, 12, 0, 0).unwrap();
        let schedule = generate_occurrences(&[med("Metformin", &["02:30", "08:00"])], &now, 7);

        assert_eq!(schedule.doses.len(), 15 * 2);
        let days: HashSet<_> = schedule
            .doses
            .iter()
            .filter(|d| d.scheduled_time.with_timezone(&tz).hour() == 8)
            .map(|d| d.scheduled_time.with_timezone(&tz).date_naive())
            .collect();
        assert_eq!(days.len(), 15);
        assert!(schedule
            .doses
            .windows(2)
            .all(|w| w[0].scheduled_time < w[1].scheduled_time));
    }
}
