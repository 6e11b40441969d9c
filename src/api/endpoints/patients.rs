//! Patient endpoints.
//!
//! Deleting a patient cascades through the database (studies, images,
//! reports, chats) and purges the patient's object-store prefix.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::endpoints::parse_id;
use crate::api::error::ApiError;
use crate::api::types::AppContext;
use crate::db;
use crate::models::{Patient, Study};
use crate::storage::patient_prefix;

#[derive(Deserialize)]
pub struct CreatePatientRequest {
    pub name: String,
    pub age: i64,
    pub sex: String,
    pub reason_for_imaging: Option<String>,
}

/// `POST /api/patients`
pub async fn create(
    State(ctx): State<AppContext>,
    Json(req): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Patient name cannot be empty".into()));
    }
    if !(0..=130).contains(&req.age) {
        return Err(ApiError::BadRequest(format!(
            "Patient age out of range: {}",
            req.age
        )));
    }
    let sex = req.sex.trim();
    if sex.is_empty() {
        return Err(ApiError::BadRequest("Patient sex cannot be empty".into()));
    }

    let patient = Patient {
        id: Uuid::new_v4(),
        name: name.to_string(),
        age: req.age,
        sex: sex.to_string(),
        reason_for_imaging: req
            .reason_for_imaging
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
        created_at: Utc::now(),
    };
    ctx.with_conn(|conn| db::insert_patient(conn, &patient))?;
    tracing::info!(patient_id = %patient.id, "Patient created");

    Ok((StatusCode::CREATED, Json(patient)))
}

/// `GET /api/patients`
pub async fn list(State(ctx): State<AppContext>) -> Result<Json<Vec<Patient>>, ApiError> {
    let patients = ctx.with_conn(db::list_patients)?;
    Ok(Json(patients))
}

#[derive(Serialize)]
pub struct PatientDetail {
    #[serde(flatten)]
    pub patient: Patient,
    /// Studies in imaging order, oldest first.
    pub studies: Vec<Study>,
}

/// `GET /api/patients/:id`
pub async fn detail(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<PatientDetail>, ApiError> {
    let id = parse_id(&id, "patient")?;
    let patient = ctx
        .with_conn(|conn| db::get_patient(conn, &id))?
        .ok_or_else(|| ApiError::NotFound("Patient not found".into()))?;
    let studies = ctx.with_conn(|conn| db::list_studies_for_patient(conn, &id))?;
    Ok(Json(PatientDetail { patient, studies }))
}

/// `DELETE /api/patients/:id` — cascade delete plus storage purge.
pub async fn remove(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "patient")?;
    ctx.with_conn(|conn| db::delete_patient(conn, &id))?;
    ctx.store.delete_prefix(&patient_prefix(&id));
    tracing::info!(patient_id = %id, "Patient deleted");
    Ok(StatusCode::NO_CONTENT)
}
