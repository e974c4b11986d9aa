//! Collaborator boundaries consumed by the dose engine.
//!
//! Three traits define what the engine needs from the outside world:
//! - MedicationDirectory: read-only medication schedules per user
//! - LogStore: durable dose logs (the only mutation point)
//! - NotificationSink: fire-and-forget dose events
//!
//! The image classifier lives in `crate::classifier`. SQLite implementations
//! are in `crate::db::repository`; in-memory ones in `memory`.

pub mod memory;

pub use memory::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{DoseLog, DoseOccurrence, Medication, NotificationKind};
use crate::photo::VerificationPhoto;

/// Read access to the medications a user is scheduled to take.
pub trait MedicationDirectory: Send + Sync {
    /// Active medications for a user, in insertion order.
    fn list_medications(&self, user_id: &Uuid) -> Result<Vec<Medication>, DatabaseError>;
}

/// Durable dose-event records.
pub trait LogStore: Send + Sync {
    /// Logs whose scheduled time falls in `[from, to]`.
    fn list_logs(
        &self,
        user_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DoseLog>, DatabaseError>;

    /// Create a `pending` log for an occurrence.
    ///
    /// Must be idempotent per (medication_id, scheduled_time): a second call
    /// returns the existing log instead of creating another. `created_at`
    /// is the caller's clock, stamped only on a newly created row.
    fn create_log(
        &self,
        user_id: &Uuid,
        medication_id: &Uuid,
        scheduled_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<DoseLog, DatabaseError>;

    /// Mark a log taken, attaching the verification photo when present.
    fn mark_taken(
        &self,
        log_id: &Uuid,
        taken_at: DateTime<Utc>,
        photo: Option<&VerificationPhoto>,
    ) -> Result<DoseLog, DatabaseError>;
}

/// A dose event pushed to the notification sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoseNotification {
    pub kind: NotificationKind,
    pub user_id: Uuid,
    pub medication_id: Uuid,
    pub medication_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub log_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl DoseNotification {
    pub fn for_occurrence(
        kind: NotificationKind,
        occurrence: &DoseOccurrence,
        log_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            user_id: occurrence.medication.user_id,
            medication_id: occurrence.medication.id,
            medication_name: occurrence.medication.name.clone(),
            scheduled_time: occurrence.scheduled_time,
            log_id,
            at,
        }
    }
}

/// Receives dose events. Delivery is fire-and-forget: implementations log
/// their own failures and never report them back to the engine.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &DoseNotification);
}

/// Sink that only writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, notification: &DoseNotification) {
        tracing::info!(
            kind = %notification.kind,
            medication_id = %notification.medication_id,
            medication = %notification.medication_name,
            scheduled_time = %notification.scheduled_time,
            "Dose notification"
        );
    }
}
