use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::Patient;

pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, name, age, sex, reason_for_imaging, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            patient.id.to_string(),
            patient.name,
            patient.age,
            patient.sex,
            patient.reason_for_imaging,
            patient.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, name, age, sex, reason_for_imaging, created_at
         FROM patients WHERE id = ?1",
        params![id.to_string()],
        patient_from_row,
    );

    match result {
        Ok(patient) => Ok(Some(patient)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_patients(conn: &Connection) -> Result<Vec<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, age, sex, reason_for_imaging, created_at
         FROM patients ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map([], patient_from_row)?;

    let mut patients = Vec::new();
    for row in rows {
        patients.push(row?);
    }
    Ok(patients)
}

/// Delete a patient. Studies, images, reports, and chats go with it via
/// FK cascade; object-store cleanup is the caller's responsibility.
pub fn delete_patient(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM patients WHERE id = ?1",
        params![id.to_string()],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "patient".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn patient_from_row(row: &rusqlite::Row<'_>) -> Result<Patient, rusqlite::Error> {
    Ok(Patient {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
        name: row.get(1)?,
        age: row.get(2)?,
        sex: row.get(3)?,
        reason_for_imaging: row.get(4)?,
        created_at: row.get::<_, DateTime<Utc>>(5)?,
    })
}
