use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::SqliteStore;
use crate::collaborators::MedicationDirectory;
use crate::db::DatabaseError;
use crate::models::{Medication, NewMedication};

/// Raw row before JSON decoding of the slot list.
struct MedicationRow {
    id: String,
    user_id: String,
    name: String,
    dosage: String,
    frequency: String,
    time_slots: String,
    remaining_pills: u32,
    total_pills: u32,
    is_active: bool,
}

fn medication_row_from_rusqlite(row: &rusqlite::Row) -> Result<MedicationRow, rusqlite::Error> {
    Ok(MedicationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        dosage: row.get(3)?,
        frequency: row.get(4)?,
        time_slots: row.get(5)?,
        remaining_pills: row.get(6)?,
        total_pills: row.get(7)?,
        is_active: row.get::<_, i32>(8)? != 0,
    })
}

fn medication_from_row(row: MedicationRow) -> Result<Medication, DatabaseError> {
    let time_slots: Vec<String> =
        serde_json::from_str(&row.time_slots).map_err(|e| DatabaseError::CorruptJson {
            column: "medications.time_slots".into(),
            reason: e.to_string(),
        })?;

    Ok(Medication {
        id: Uuid::parse_str(&row.id).unwrap_or_default(),
        user_id: Uuid::parse_str(&row.user_id).unwrap_or_default(),
        name: row.name,
        dosage: row.dosage,
        frequency: row.frequency,
        time_slots,
        remaining_pills: row.remaining_pills,
        total_pills: row.total_pills,
        is_active: row.is_active,
    })
}

const MEDICATION_COLUMNS: &str = "id, user_id, name, dosage, frequency, time_slots,
     remaining_pills, total_pills, is_active";

/// Register a medication. The inventory starts full.
pub fn insert_medication(
    conn: &Connection,
    user_id: &Uuid,
    input: &NewMedication,
    created_at: DateTime<Utc>,
) -> Result<Medication, DatabaseError> {
    if input.name.trim().is_empty() {
        return Err(DatabaseError::ConstraintViolation(
            "medication name must not be empty".into(),
        ));
    }

    let med = Medication {
        id: Uuid::new_v4(),
        user_id: *user_id,
        name: input.name.trim().to_string(),
        dosage: input.dosage.trim().to_string(),
        frequency: input.frequency.trim().to_string(),
        time_slots: input.time_slots.iter().map(|s| s.trim().to_string()).collect(),
        remaining_pills: input.total_pills,
        total_pills: input.total_pills,
        is_active: true,
    };

    let slots_json = serde_json::to_string(&med.time_slots).map_err(|e| {
        DatabaseError::CorruptJson {
            column: "medications.time_slots".into(),
            reason: e.to_string(),
        }
    })?;

    conn.execute(
        "INSERT INTO medications (id, user_id, name, dosage, frequency, time_slots,
         remaining_pills, total_pills, is_active, seq, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1,
                 (SELECT COALESCE(MAX(seq), 0) + 1 FROM medications), ?9)",
        params![
            med.id.to_string(),
            med.user_id.to_string(),
            med.name,
            med.dosage,
            med.frequency,
            slots_json,
            med.remaining_pills,
            med.total_pills,
            created_at,
        ],
    )?;

    tracing::info!(medication_id = %med.id, slots = med.time_slots.len(), "Medication registered");
    Ok(med)
}

pub fn get_medication(conn: &Connection, id: &Uuid) -> Result<Option<Medication>, DatabaseError> {
    let result = conn.query_row(
        &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"),
        params![id.to_string()],
        medication_row_from_rusqlite,
    );

    match result {
        Ok(row) => Ok(Some(medication_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// Active medications for a user, in registration order.
pub fn list_active_medications(
    conn: &Connection,
    user_id: &Uuid,
) -> Result<Vec<Medication>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications
         WHERE user_id = ?1 AND is_active = 1
         ORDER BY seq ASC"
    ))?;

    let rows = stmt.query_map(params![user_id.to_string()], medication_row_from_rusqlite)?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row?)?);
    }
    Ok(meds)
}

/// Soft delete: the medication drops out of schedules, its logs remain.
pub fn deactivate_medication(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET is_active = 0 WHERE id = ?1",
        params![id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Medication".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Update the remaining pill count (refill or manual correction).
pub fn update_remaining_pills(
    conn: &Connection,
    id: &Uuid,
    remaining_pills: u32,
) -> Result<(), DatabaseError> {
    let changed = conn
        .execute(
            "UPDATE medications SET remaining_pills = ?2 WHERE id = ?1",
            params![id.to_string(), remaining_pills],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::ConstraintViolation(format!(
                    "remaining pills {remaining_pills} exceeds total"
                ))
            }
            other => DatabaseError::from(other),
        })?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Medication".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

impl MedicationDirectory for SqliteStore {
    fn list_medications(&self, user_id: &Uuid) -> Result<Vec<Medication>, DatabaseError> {
        let conn = self.conn()?;
        list_active_medications(&conn, user_id)
    }
}
