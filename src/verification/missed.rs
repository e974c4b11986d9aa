use chrono::{DateTime, Utc};

use super::VerificationError;
use crate::collaborators::{DoseNotification, LogStore, NotificationSink};
use crate::models::{DoseLog, DoseOccurrence, NotificationKind, OccurrenceStatus};
use crate::schedule::DismissedSet;

fn require_missed(occurrence: &DoseOccurrence) -> Result<(), VerificationError> {
    if occurrence.status != OccurrenceStatus::Missed {
        return Err(VerificationError::OccurrenceNotMissed {
            id: occurrence.id.clone(),
            status: occurrence.status,
        });
    }
    Ok(())
}

/// The user says they did take a missed dose: log it taken at `now`.
///
/// The dismissed marker is recorded only once the write succeeds, so a
/// failed attempt leaves the dose in the banner for a retry.
pub fn confirm_missed_taken(
    occurrence: &DoseOccurrence,
    store: &dyn LogStore,
    sink: &dyn NotificationSink,
    dismissed: &mut DismissedSet,
    now: DateTime<Utc>,
) -> Result<DoseLog, VerificationError> {
    require_missed(occurrence)?;

    let log_id = match occurrence.log_id {
        Some(id) => id,
        None => {
            store
                .create_log(
                    &occurrence.medication.user_id,
                    &occurrence.medication_id(),
                    occurrence.scheduled_time,
                    now,
                )?
                .id
        }
    };
    let log = store.mark_taken(&log_id, now, None)?;

    dismissed.insert(occurrence.id.clone());
    tracing::info!(
        occurrence = %occurrence.id,
        log_id = %log.id,
        "Missed dose confirmed taken"
    );
    sink.notify(&DoseNotification::for_occurrence(
        NotificationKind::DoseTaken,
        occurrence,
        Some(log.id),
        now,
    ));
    Ok(log)
}

/// The user confirms a dose was not taken. Nothing is written to the log
/// store; the caregiver alert stands.
pub fn confirm_missed_not_taken(
    occurrence: &DoseOccurrence,
    sink: &dyn NotificationSink,
    dismissed: &mut DismissedSet,
    now: DateTime<Utc>,
) -> Result<(), VerificationError> {
    require_missed(occurrence)?;

    dismissed.insert(occurrence.id.clone());
    tracing::info!(occurrence = %occurrence.id, "Missed dose confirmed not taken");

    for kind in [NotificationKind::DoseMissed, NotificationKind::CaregiverAlert] {
        sink.notify(&DoseNotification::for_occurrence(
            kind,
            occurrence,
            occurrence.log_id,
            now,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryLogStore, RecordingSink};
    use crate::models::{LogStatus, Medication, OccurrenceId};
    use chrono::TimeZone;
    use std::sync::Arc;
    use uuid::Uuid;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    fn missed() -> DoseOccurrence {
        let medication = Arc::new(Medication {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Atorvastatin".into(),
            dosage: "20mg".into(),
            frequency: "nightly".into(),
            time_slots: vec!["06:00".into()],
            remaining_pills: 30,
            total_pills: 30,
            is_active: true,
        });
        DoseOccurrence {
            id: OccurrenceId::new(&medication.id, &at(6, 0)),
            scheduled_time: at(6, 0),
            medication,
            status: OccurrenceStatus::Missed,
            log_id: None,
        }
    }

    #[test]
    fn confirm_taken_creates_and_marks_log() {
        let store = InMemoryLogStore::new();
        let sink = RecordingSink::new();
        let mut dismissed = DismissedSet::new();
        let occurrence = missed();

        let log = confirm_missed_taken(&occurrence, &store, &sink, &mut dismissed, at(9, 0)).unwrap();

        assert_eq!(log.status, LogStatus::Taken);
        assert_eq!(log.taken_at, Some(at(9, 0)));
        assert_eq!(log.created_at, at(9, 0));
        assert_eq!(log.scheduled_time, at(6, 0));
        assert!(log.verification_photo.is_none());
        assert!(dismissed.contains(&occurrence.id));
        assert_eq!(sink.kinds(), vec![NotificationKind::DoseTaken]);
    }

    #[test]
    fn confirm_taken_failure_does_not_dismiss() {
        let store = InMemoryLogStore::new();
        store.set_fail_writes(true);
        let mut dismissed = DismissedSet::new();

        let err = confirm_missed_taken(&missed(), &store, &RecordingSink::new(), &mut dismissed, at(9, 0))
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(dismissed.is_empty());
    }

    #[test]
    fn confirm_not_taken_writes_nothing() {
        let store = InMemoryLogStore::new();
        let sink = RecordingSink::new();
        let mut dismissed = DismissedSet::new();
        let occurrence = missed();

        confirm_missed_not_taken(&occurrence, &sink, &mut dismissed, at(9, 0)).unwrap();

        assert!(store.snapshot().is_empty());
        assert!(dismissed.contains(&occurrence.id));
        assert_eq!(
            sink.kinds(),
            vec![NotificationKind::DoseMissed, NotificationKind::CaregiverAlert]
        );
    }

    #[test]
    fn only_missed_occurrences_accepted() {
        let mut occurrence = missed();
        occurrence.status = OccurrenceStatus::Current;
        let mut dismissed = DismissedSet::new();
        let sink = RecordingSink::new();

        assert!(matches!(
            confirm_missed_not_taken(&occurrence, &sink, &mut dismissed, at(9, 0)),
            Err(VerificationError::OccurrenceNotMissed { .. })
        ));
        assert!(matches!(
            confirm_missed_taken(&occurrence, &InMemoryLogStore::new(), &sink, &mut dismissed, at(9, 0)),
            Err(VerificationError::OccurrenceNotMissed { .. })
        ));
        assert!(dismissed.is_empty());
        assert!(sink.notifications().is_empty());
    }
}
