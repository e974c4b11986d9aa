use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{ts_to_datetime, SqliteStore};
use crate::collaborators::LogStore;
use crate::db::DatabaseError;
use crate::models::{DoseLog, LogStatus};
use crate::photo::{PhotoRef, VerificationPhoto};

const LOG_COLUMNS: &str =
    "id, user_id, medication_id, scheduled_ts, status, taken_at, verification_photo, created_at";

struct DoseLogRow {
    id: String,
    user_id: String,
    medication_id: String,
    scheduled_ts: i64,
    status: String,
    taken_at: Option<DateTime<Utc>>,
    verification_photo: Option<String>,
    created_at: DateTime<Utc>,
}

fn dose_log_row_from_rusqlite(row: &rusqlite::Row) -> Result<DoseLogRow, rusqlite::Error> {
    Ok(DoseLogRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        medication_id: row.get(2)?,
        scheduled_ts: row.get(3)?,
        status: row.get(4)?,
        taken_at: row.get(5)?,
        verification_photo: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn dose_log_from_row(row: DoseLogRow) -> Result<DoseLog, DatabaseError> {
    Ok(DoseLog {
        id: Uuid::parse_str(&row.id).unwrap_or_default(),
        user_id: Uuid::parse_str(&row.user_id).unwrap_or_default(),
        medication_id: Uuid::parse_str(&row.medication_id).unwrap_or_default(),
        scheduled_time: ts_to_datetime(row.scheduled_ts)?,
        status: LogStatus::from_str(&row.status)?,
        taken_at: row.taken_at,
        verification_photo: row.verification_photo.map(PhotoRef::new),
        created_at: row.created_at,
    })
}

pub fn get_log(conn: &Connection, id: &Uuid) -> Result<Option<DoseLog>, DatabaseError> {
    conn.query_row(
        &format!("SELECT {LOG_COLUMNS} FROM dose_logs WHERE id = ?1"),
        params![id.to_string()],
        dose_log_row_from_rusqlite,
    )
    .optional()?
    .map(dose_log_from_row)
    .transpose()
}

/// The log for one (medication, slot) pair, if any.
pub fn find_log_for_slot(
    conn: &Connection,
    medication_id: &Uuid,
    scheduled_time: DateTime<Utc>,
) -> Result<Option<DoseLog>, DatabaseError> {
    conn.query_row(
        &format!(
            "SELECT {LOG_COLUMNS} FROM dose_logs
             WHERE medication_id = ?1 AND scheduled_ts = ?2"
        ),
        params![medication_id.to_string(), scheduled_time.timestamp()],
        dose_log_row_from_rusqlite,
    )
    .optional()?
    .map(dose_log_from_row)
    .transpose()
}

/// Create a `pending` log, or return the one that already exists for the slot.
pub fn create_log(
    conn: &Connection,
    user_id: &Uuid,
    medication_id: &Uuid,
    scheduled_time: DateTime<Utc>,
    created_at: DateTime<Utc>,
) -> Result<DoseLog, DatabaseError> {
    let inserted = conn.execute(
        "INSERT INTO dose_logs (id, user_id, medication_id, scheduled_ts, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
         ON CONFLICT (medication_id, scheduled_ts) DO NOTHING",
        params![
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            medication_id.to_string(),
            scheduled_time.timestamp(),
            created_at,
        ],
    )?;

    if inserted == 0 {
        tracing::debug!(
            medication_id = %medication_id,
            scheduled_time = %scheduled_time,
            "Dose log already exists for slot"
        );
    }

    find_log_for_slot(conn, medication_id, scheduled_time)?.ok_or_else(|| {
        DatabaseError::NotFound {
            entity_type: "DoseLog".into(),
            id: format!("{medication_id}@{}", scheduled_time.timestamp()),
        }
    })
}

/// Logs for a user with scheduled time in `[from, to]`, latest first.
pub fn list_logs_in_range(
    conn: &Connection,
    user_id: &Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<DoseLog>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOG_COLUMNS} FROM dose_logs
         WHERE user_id = ?1 AND scheduled_ts BETWEEN ?2 AND ?3
         ORDER BY scheduled_ts DESC"
    ))?;

    let rows = stmt.query_map(
        params![user_id.to_string(), from.timestamp(), to.timestamp()],
        dose_log_row_from_rusqlite,
    )?;

    let mut logs = Vec::new();
    for row in rows {
        logs.push(dose_log_from_row(row?)?);
    }
    Ok(logs)
}

/// Store photo bytes under their content reference. Re-storing is a no-op.
pub fn store_photo(
    conn: &Connection,
    photo: &VerificationPhoto,
    created_at: DateTime<Utc>,
) -> Result<PhotoRef, DatabaseError> {
    let reference = photo.reference();
    conn.execute(
        "INSERT OR IGNORE INTO verification_photos (reference, content, created_at)
         VALUES (?1, ?2, ?3)",
        params![reference.as_str(), photo.bytes(), created_at],
    )?;
    Ok(reference)
}

pub fn get_photo(conn: &Connection, reference: &PhotoRef) -> Result<Option<Vec<u8>>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT content FROM verification_photos WHERE reference = ?1",
            params![reference.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Mark a log taken, storing the photo in the same transaction.
///
/// Marking an already-taken log keeps its first `taken_at`; a photo
/// supplied on the retry is still attached.
pub fn mark_log_taken(
    conn: &Connection,
    log_id: &Uuid,
    taken_at: DateTime<Utc>,
    photo: Option<&VerificationPhoto>,
) -> Result<DoseLog, DatabaseError> {
    let tx = conn.unchecked_transaction()?;

    let reference = photo
        .map(|p| store_photo(&tx, p, taken_at))
        .transpose()?;

    let changed = tx.execute(
        "UPDATE dose_logs
         SET status = 'taken',
             taken_at = CASE WHEN status = 'taken' THEN taken_at ELSE ?2 END,
             verification_photo = COALESCE(?3, verification_photo)
         WHERE id = ?1",
        params![
            log_id.to_string(),
            taken_at,
            reference.as_ref().map(|r| r.as_str()),
        ],
    )?;

    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "DoseLog".into(),
            id: log_id.to_string(),
        });
    }

    tx.commit()?;

    get_log(conn, log_id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "DoseLog".into(),
        id: log_id.to_string(),
    })
}

impl LogStore for SqliteStore {
    fn list_logs(
        &self,
        user_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DoseLog>, DatabaseError> {
        let conn = self.conn()?;
        list_logs_in_range(&conn, user_id, from, to)
    }

    fn create_log(
        &self,
        user_id: &Uuid,
        medication_id: &Uuid,
        scheduled_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Result<DoseLog, DatabaseError> {
        let conn = self.conn()?;
        create_log(&conn, user_id, medication_id, scheduled_time, created_at)
    }

    fn mark_taken(
        &self,
        log_id: &Uuid,
        taken_at: DateTime<Utc>,
        photo: Option<&VerificationPhoto>,
    ) -> Result<DoseLog, DatabaseError> {
        let conn = self.conn()?;
        let log = mark_log_taken(&conn, log_id, taken_at, photo)?;
        tracing::info!(log_id = %log_id, photo = log.verification_photo.is_some(), "Dose log marked taken");
        Ok(log)
    }
}
