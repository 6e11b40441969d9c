use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::StudyProcessingState;
use crate::models::Study;

pub fn insert_study(conn: &Connection, study: &Study) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO studies
            (id, patient_id, title, modality, imaging_datetime, series_summary,
             include_codes, processing_state, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            study.id.to_string(),
            study.patient_id.to_string(),
            study.title,
            study.modality,
            study.imaging_datetime,
            study.series_summary,
            study.include_codes,
            study.processing_state.as_str(),
            study.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_study(conn: &Connection, id: &Uuid) -> Result<Option<Study>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_id, title, modality, imaging_datetime, series_summary,
                    include_codes, processing_state, created_at
             FROM studies WHERE id = ?1",
            params![id.to_string()],
            study_row,
        )
        .optional()?;

    row.map(study_from_row).transpose()
}

/// Studies for one patient, oldest imaging first — the order every
/// aggregation over studies relies on.
pub fn list_studies_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<Study>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, title, modality, imaging_datetime, series_summary,
                include_codes, processing_state, created_at
         FROM studies WHERE patient_id = ?1 ORDER BY imaging_datetime ASC",
    )?;

    let rows = stmt.query_map(params![patient_id.to_string()], study_row)?;

    let mut studies = Vec::new();
    for row in rows {
        studies.push(study_from_row(row?)?);
    }
    Ok(studies)
}

pub fn update_study_summary(
    conn: &Connection,
    id: &Uuid,
    summary: &str,
) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE studies SET series_summary = ?2 WHERE id = ?1",
        params![id.to_string(), summary],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

pub fn update_study_state(
    conn: &Connection,
    id: &Uuid,
    state: StudyProcessingState,
) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE studies SET processing_state = ?2 WHERE id = ?1",
        params![id.to_string(), state.as_str()],
    )?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

pub fn delete_study(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let affected = conn.execute("DELETE FROM studies WHERE id = ?1", params![id.to_string()])?;
    if affected == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "study".into(),
        id: id.to_string(),
    }
}

struct StudyRow {
    id: String,
    patient_id: String,
    title: String,
    modality: Option<String>,
    imaging_datetime: DateTime<Utc>,
    series_summary: String,
    include_codes: bool,
    processing_state: String,
    created_at: DateTime<Utc>,
}

fn study_row(row: &rusqlite::Row<'_>) -> Result<StudyRow, rusqlite::Error> {
    Ok(StudyRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        title: row.get(2)?,
        modality: row.get(3)?,
        imaging_datetime: row.get(4)?,
        series_summary: row.get(5)?,
        include_codes: row.get(6)?,
        processing_state: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn study_from_row(row: StudyRow) -> Result<Study, DatabaseError> {
    Ok(Study {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        patient_id: Uuid::parse_str(&row.patient_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        title: row.title,
        modality: row.modality,
        imaging_datetime: row.imaging_datetime,
        series_summary: row.series_summary,
        include_codes: row.include_codes,
        processing_state: StudyProcessingState::from_str(&row.processing_state)?,
        created_at: row.created_at,
    })
}
