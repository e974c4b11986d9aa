use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::LogStatus;
use crate::photo::PhotoRef;

/// Durable record of one scheduled dose, owned by the log store.
///
/// At most one log exists per (medication_id, scheduled_time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
    pub status: LogStatus,
    /// Present iff `status` is `Taken`.
    pub taken_at: Option<DateTime<Utc>>,
    pub verification_photo: Option<PhotoRef>,
    pub created_at: DateTime<Utc>,
}

impl DoseLog {
    pub fn is_taken(&self) -> bool {
        self.status == LogStatus::Taken
    }
}
