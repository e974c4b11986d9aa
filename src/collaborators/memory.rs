use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DoseNotification, LogStore, MedicationDirectory, NotificationSink};
use crate::db::DatabaseError;
use crate::models::{DoseLog, LogStatus, Medication, NotificationKind};
use crate::photo::VerificationPhoto;

/// Fixed medication list, filtered per user and to active entries.
#[derive(Debug, Clone, Default)]
pub struct StaticMedicationDirectory {
    medications: Vec<Medication>,
}

impl StaticMedicationDirectory {
    pub fn new(medications: Vec<Medication>) -> Self {
        Self { medications }
    }
}

impl MedicationDirectory for StaticMedicationDirectory {
    fn list_medications(&self, user_id: &Uuid) -> Result<Vec<Medication>, DatabaseError> {
        Ok(self
            .medications
            .iter()
            .filter(|m| &m.user_id == user_id && m.is_active)
            .cloned()
            .collect())
    }
}

/// In-memory log store for testing. Writes can be switched to fail.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    logs: Mutex<Vec<DoseLog>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful mutating calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<DoseLog> {
        self.logs.lock().map(|logs| logs.clone()).unwrap_or_default()
    }

    fn check_writable(&self) -> Result<(), DatabaseError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConstraintViolation(
                "log store unavailable".into(),
            ));
        }
        Ok(())
    }
}

impl LogStore for InMemoryLogStore {
    fn list_logs(
        &self,
        user_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DoseLog>, DatabaseError> {
        let logs = self.logs.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let mut found: Vec<DoseLog> = logs
            .iter()
            .filter(|l| &l.user_id == user_id && l.scheduled_time >= from && l.scheduled_time <= to)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.scheduled_time.cmp(&a.scheduled_time));
        Ok(found)
    }

    fn create_log(
        &self,
        user_id: &Uuid,
        medication_id: &Uuid,
        scheduled_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<DoseLog, DatabaseError> {
        self.check_writable()?;
        let mut logs = self.logs.lock().map_err(|_| DatabaseError::LockPoisoned)?;

        if let Some(existing) = logs
            .iter()
            .find(|l| &l.medication_id == medication_id && l.scheduled_time == scheduled_time)
        {
            return Ok(existing.clone());
        }

        let log = DoseLog {
            id: Uuid::new_v4(),
            user_id: *user_id,
            medication_id: *medication_id,
            scheduled_time,
            status: LogStatus::Pending,
            taken_at: None,
            verification_photo: None,
            created_at,
        };
        logs.push(log.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(log)
    }

    fn mark_taken(
        &self,
        log_id: &Uuid,
        taken_at: DateTime<Utc>,
        photo: Option<&VerificationPhoto>,
    ) -> Result<DoseLog, DatabaseError> {
        self.check_writable()?;
        let mut logs = self.logs.lock().map_err(|_| DatabaseError::LockPoisoned)?;

        let log = logs
            .iter_mut()
            .find(|l| &l.id == log_id)
            .ok_or_else(|| DatabaseError::NotFound {
                entity_type: "DoseLog".into(),
                id: log_id.to_string(),
            })?;

        if !log.is_taken() {
            log.status = LogStatus::Taken;
            log.taken_at = Some(taken_at);
        }
        if let Some(photo) = photo {
            log.verification_photo = Some(photo.reference());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(log.clone())
    }
}

/// Sink that keeps every notification, for testing.
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<DoseNotification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<DoseNotification> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.notifications().iter().map(|n| n.kind).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &DoseNotification) {
        match self.received.lock() {
            Ok(mut received) => received.push(notification.clone()),
            Err(_) => tracing::warn!("Recording sink lock poisoned, notification dropped"),
        }
    }
}
