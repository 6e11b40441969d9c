use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{CitationMap, Report, ReportPayload};

pub fn insert_report(conn: &Connection, report: &Report) -> Result<(), DatabaseError> {
    let citations = serde_json::to_string(&report.payload.citations)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    let icd10 = encode_codes(report.payload.icd10_codes.as_ref())?;
    let snomed = encode_codes(report.payload.snomed_codes.as_ref())?;

    conn.execute(
        "INSERT INTO reports
            (id, patient_id, findings, impression, next_steps,
             icd10_codes, snomed_codes, citations, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            report.id.to_string(),
            report.patient_id.to_string(),
            report.payload.findings,
            report.payload.impression,
            report.payload.next_steps,
            icd10,
            snomed,
            citations,
            report.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_report(conn: &Connection, id: &Uuid) -> Result<Option<Report>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_id, findings, impression, next_steps,
                    icd10_codes, snomed_codes, citations, created_at
             FROM reports WHERE id = ?1",
            params![id.to_string()],
            report_row,
        )
        .optional()?;

    row.map(report_from_row).transpose()
}

/// Most recent report for a patient, if any.
pub fn latest_report_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Option<Report>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_id, findings, impression, next_steps,
                    icd10_codes, snomed_codes, citations, created_at
             FROM reports WHERE patient_id = ?1
             ORDER BY created_at DESC LIMIT 1",
            params![patient_id.to_string()],
            report_row,
        )
        .optional()?;

    row.map(report_from_row).transpose()
}

pub fn list_reports_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<Report>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, findings, impression, next_steps,
                icd10_codes, snomed_codes, citations, created_at
         FROM reports WHERE patient_id = ?1 ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map(params![patient_id.to_string()], report_row)?;

    let mut reports = Vec::new();
    for row in rows {
        reports.push(report_from_row(row?)?);
    }
    Ok(reports)
}

fn encode_codes(codes: Option<&Vec<String>>) -> Result<Option<String>, DatabaseError> {
    codes
        .map(|c| serde_json::to_string(c))
        .transpose()
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

fn decode_codes(raw: Option<String>) -> Result<Option<Vec<String>>, DatabaseError> {
    raw.map(|r| serde_json::from_str(&r))
        .transpose()
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

struct ReportRow {
    id: String,
    patient_id: String,
    findings: String,
    impression: String,
    next_steps: String,
    icd10_codes: Option<String>,
    snomed_codes: Option<String>,
    citations: String,
    created_at: DateTime<Utc>,
}

fn report_row(row: &rusqlite::Row<'_>) -> Result<ReportRow, rusqlite::Error> {
    Ok(ReportRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        findings: row.get(2)?,
        impression: row.get(3)?,
        next_steps: row.get(4)?,
        icd10_codes: row.get(5)?,
        snomed_codes: row.get(6)?,
        citations: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn report_from_row(row: ReportRow) -> Result<Report, DatabaseError> {
    let citations: CitationMap = serde_json::from_str(&row.citations)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;

    Ok(Report {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        patient_id: Uuid::parse_str(&row.patient_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        payload: ReportPayload {
            findings: row.findings,
            impression: row.impression,
            next_steps: row.next_steps,
            icd10_codes: decode_codes(row.icd10_codes)?,
            snomed_codes: decode_codes(row.snomed_codes)?,
            citations,
        },
        created_at: row.created_at,
    })
}
