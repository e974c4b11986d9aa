use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use super::{ts_to_datetime, SqliteStore};
use crate::collaborators::{DoseNotification, NotificationSink};
use crate::db::DatabaseError;
use crate::models::NotificationKind;

/// A notification as recorded by the SQLite sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredNotification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub medication_id: Uuid,
    pub medication_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub log_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub fn insert_notification(
    conn: &Connection,
    notification: &DoseNotification,
) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO dose_notifications (id, kind, user_id, medication_id, medication_name,
         scheduled_ts, log_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.to_string(),
            notification.kind.as_str(),
            notification.user_id.to_string(),
            notification.medication_id.to_string(),
            notification.medication_name,
            notification.scheduled_time.timestamp(),
            notification.log_id.map(|l| l.to_string()),
            notification.at,
        ],
    )?;
    Ok(id)
}

/// Notifications recorded for a user, oldest first.
pub fn list_notifications(
    conn: &Connection,
    user_id: &Uuid,
) -> Result<Vec<StoredNotification>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, medication_id, medication_name, scheduled_ts, log_id, created_at
         FROM dose_notifications WHERE user_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![user_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, DateTime<Utc>>(6)?,
        ))
    })?;

    let mut notifications = Vec::new();
    for row in rows {
        let (id, kind, medication_id, medication_name, scheduled_ts, log_id, created_at) = row?;
        notifications.push(StoredNotification {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            kind: NotificationKind::from_str(&kind)?,
            medication_id: Uuid::parse_str(&medication_id).unwrap_or_default(),
            medication_name,
            scheduled_time: ts_to_datetime(scheduled_ts)?,
            log_id: log_id.and_then(|l| Uuid::parse_str(&l).ok()),
            created_at,
        });
    }
    Ok(notifications)
}

/// Whether a caregiver alert has already been raised for this dose slot.
pub fn caregiver_alerted(
    conn: &Connection,
    medication_id: &Uuid,
    scheduled_time: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dose_notifications
         WHERE medication_id = ?1 AND scheduled_ts = ?2 AND kind = 'caregiver_alert'",
        params![medication_id.to_string(), scheduled_time.timestamp()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl NotificationSink for SqliteStore {
    fn notify(&self, notification: &DoseNotification) {
        let result = self
            .conn()
            .and_then(|conn| insert_notification(&conn, notification));

        match result {
            Ok(id) => tracing::info!(
                notification_id = %id,
                kind = %notification.kind,
                medication_id = %notification.medication_id,
                "Dose notification recorded"
            ),
            Err(e) => tracing::warn!(
                kind = %notification.kind,
                medication_id = %notification.medication_id,
                error = %e,
                "Failed to record dose notification"
            ),
        }
    }
}
