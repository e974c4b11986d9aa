use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::generator::{generate_occurrences, RejectedMedication};
use super::status::{classify_status, StatusWindow};
use crate::collaborators::{LogStore, MedicationDirectory};
use crate::config::{TrackerConfig, DEFAULT_WINDOW_DAYS};
use crate::db::DatabaseError;
use crate::models::{DoseLog, DoseOccurrence, Medication, OccurrenceId, OccurrenceStatus};

/// Window and proximity settings for a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub window_days: i64,
    pub status_window: StatusWindow,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            status_window: StatusWindow::default(),
        }
    }
}

impl From<&TrackerConfig> for ScheduleSettings {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            window_days: config.window_days,
            status_window: StatusWindow {
                lead: config.current_lead(),
                grace: config.current_grace(),
            },
        }
    }
}

/// Missed occurrences the user already answered in this process.
///
/// Process-local and lost on restart. Only suppresses re-prompting; the log
/// store stays the source of truth.
#[derive(Debug, Clone, Default)]
pub struct DismissedSet {
    ids: HashSet<OccurrenceId>,
}

impl DismissedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the occurrence was already dismissed.
    pub fn insert(&mut self, id: OccurrenceId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &OccurrenceId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// One reconciliation pass: the timeline and the missed banner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Every occurrence in the window, ascending by scheduled time.
    pub occurrences: Vec<DoseOccurrence>,
    /// `missed` occurrences not yet answered, earliest first.
    pub unresolved_missed: Vec<DoseOccurrence>,
    pub rejected: Vec<RejectedMedication>,
}

impl Reconciliation {
    pub fn find(&self, id: &OccurrenceId) -> Option<&DoseOccurrence> {
        self.occurrences.iter().find(|o| &o.id == id)
    }

    /// The missed occurrence to present first.
    pub fn next_missed(&self) -> Option<&DoseOccurrence> {
        self.unresolved_missed.first()
    }

    pub fn count(&self, status: OccurrenceStatus) -> usize {
        self.occurrences.iter().filter(|o| o.status == status).count()
    }
}

/// Combine schedule and logs into status-annotated occurrences.
///
/// Pure: the same inputs always give the same output. Logs match
/// occurrences by exact (medication_id, scheduled_time).
pub fn reconcile<Tz: TimeZone>(
    medications: &[Medication],
    logs: &[DoseLog],
    now: &DateTime<Tz>,
    settings: &ScheduleSettings,
    dismissed: &DismissedSet,
) -> Reconciliation {
    let medications: Vec<Arc<Medication>> =
        medications.iter().cloned().map(Arc::new).collect();
    let schedule = generate_occurrences(&medications, now, settings.window_days);
    let now_utc = now.with_timezone(&Utc);

    let by_slot = index_logs(logs);

    let occurrences: Vec<DoseOccurrence> = schedule
        .doses
        .into_iter()
        .map(|dose| {
            let log = by_slot
                .get(&(dose.medication.id, dose.scheduled_time))
                .copied();
            DoseOccurrence {
                status: classify_status(
                    dose.scheduled_time,
                    log,
                    now_utc,
                    &settings.status_window,
                ),
                log_id: log.map(|l| l.id),
                id: dose.id,
                medication: dose.medication,
                scheduled_time: dose.scheduled_time,
            }
        })
        .collect();

    let unresolved_missed = occurrences
        .iter()
        .filter(|o| o.status == OccurrenceStatus::Missed && !dismissed.contains(&o.id))
        .cloned()
        .collect();

    Reconciliation {
        occurrences,
        unresolved_missed,
        rejected: schedule.rejected,
    }
}

/// Index logs by slot. Should the store ever hold two logs for one slot,
/// a taken one is preferred so a confirmed dose is never hidden.
fn index_logs(logs: &[DoseLog]) -> HashMap<(Uuid, DateTime<Utc>), &DoseLog> {
    let mut by_slot: HashMap<(Uuid, DateTime<Utc>), &DoseLog> = HashMap::new();
    for log in logs {
        by_slot
            .entry((log.medication_id, log.scheduled_time))
            .and_modify(|existing| {
                if !existing.is_taken() && log.is_taken() {
                    *existing = log;
                }
            })
            .or_insert(log);
    }
    by_slot
}

/// Read medications and logs for a user, then reconcile.
///
/// Logs are fetched for exactly the span the generator covers.
pub fn reconcile_from_sources<Tz: TimeZone>(
    directory: &dyn MedicationDirectory,
    store: &dyn LogStore,
    user_id: &Uuid,
    now: &DateTime<Tz>,
    settings: &ScheduleSettings,
    dismissed: &DismissedSet,
) -> Result<Reconciliation, DatabaseError> {
    let medications = directory.list_medications(user_id)?;
    let (from, to) = window_bounds(now, settings.window_days);
    let logs = store.list_logs(user_id, from, to)?;

    let result = reconcile(&medications, &logs, now, settings, dismissed);
    tracing::debug!(
        user_id = %user_id,
        medications = medications.len(),
        logs = logs.len(),
        occurrences = result.occurrences.len(),
        missed = result.unresolved_missed.len(),
        rejected = result.rejected.len(),
        "Reconciled dose schedule"
    );
    Ok(result)
}

/// Instant range covering every calendar day of the generation window.
pub fn window_bounds<Tz: TimeZone>(
    now: &DateTime<Tz>,
    window_days: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let tz = now.timezone();
    let today = now.date_naive();
    let first = today - chrono::Duration::days(window_days);
    let last = today + chrono::Duration::days(window_days + 1);

    let start = tz
        .from_local_datetime(&first.and_time(chrono::NaiveTime::MIN))
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc) - chrono::Duration::days(window_days + 1));
    let end = tz
        .from_local_datetime(&last.and_time(chrono::NaiveTime::MIN))
        .latest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc) + chrono::Duration::days(window_days + 1));

    (start, end)
}
