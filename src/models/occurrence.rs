use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::OccurrenceStatus;
use super::medication::Medication;

/// Deterministic occurrence identifier: `{medication_id}@{unix_seconds}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccurrenceId(String);

impl OccurrenceId {
    pub fn new(medication_id: &Uuid, scheduled_time: &DateTime<Utc>) -> Self {
        Self(format!("{}@{}", medication_id, scheduled_time.timestamp()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One expansion of a medication time slot onto a calendar day,
/// before any log has been consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledDose {
    pub id: OccurrenceId,
    pub medication: Arc<Medication>,
    pub scheduled_time: DateTime<Utc>,
}

/// A scheduled dose annotated with its reconciled status.
///
/// Never persisted and never mutated: every reconciliation pass builds
/// fresh values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoseOccurrence {
    pub id: OccurrenceId,
    pub medication: Arc<Medication>,
    pub scheduled_time: DateTime<Utc>,
    pub status: OccurrenceStatus,
    pub log_id: Option<Uuid>,
}

impl DoseOccurrence {
    pub fn medication_id(&self) -> Uuid {
        self.medication.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn occurrence_id_is_deterministic() {
        let med = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(OccurrenceId::new(&med, &at), OccurrenceId::new(&med, &at));
        assert!(OccurrenceId::new(&med, &at)
            .as_str()
            .starts_with(&med.to_string()));
    }

    #[test]
    fn occurrence_id_differs_by_time_and_medication() {
        let med = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 3, 1, 20, 0, 0).unwrap();
        assert_ne!(OccurrenceId::new(&med, &at), OccurrenceId::new(&med, &later));
        assert_ne!(
            OccurrenceId::new(&med, &at),
            OccurrenceId::new(&Uuid::new_v4(), &at)
        );
    }
}
