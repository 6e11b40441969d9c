//! Report endpoints: synthesis and latest-report retrieval.
//!
//! Synthesis is a single blocking call over all of the patient's study
//! summaries; the persisted report carries the raw citation tokens, and
//! display numbering is recomputed per render (`?rendered=true`).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::endpoints::parse_id;
use crate::api::error::ApiError;
use crate::api::types::AppContext;
use crate::db;
use crate::models::Report;
use crate::pipeline::citations::{self, DisplayNumbering, RenderedSegment};

#[derive(Deserialize)]
pub struct CreateReportRequest {
    #[serde(default)]
    pub include_codes: bool,
}

/// `POST /api/patients/:id/reports`
pub async fn create(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<Report>), ApiError> {
    let patient_id = parse_id(&id, "patient")?;
    let patient = ctx
        .with_conn(|conn| db::get_patient(conn, &patient_id))?
        .ok_or_else(|| ApiError::NotFound("Patient not found".into()))?;
    let studies = ctx.with_conn(|conn| db::list_studies_for_patient(conn, &patient_id))?;
    if studies.is_empty() {
        return Err(ApiError::BadRequest(
            "Patient has no studies to report on".into(),
        ));
    }

    // Any study flagged for coding pulls code lists into the report.
    let include_codes = req.include_codes || studies.iter().any(|s| s.include_codes);

    let payload = ctx
        .reports
        .synthesize(&patient, &studies, include_codes)
        .await?;
    let report = Report {
        id: Uuid::new_v4(),
        patient_id,
        payload,
        created_at: Utc::now(),
    };
    ctx.with_conn(|conn| db::insert_report(conn, &report))?;
    tracing::info!(patient_id = %patient_id, report_id = %report.id, "Report persisted");

    Ok((StatusCode::CREATED, Json(report)))
}

#[derive(Deserialize)]
pub struct LatestReportQuery {
    #[serde(default)]
    pub rendered: bool,
}

/// One rendered run: pass-through text or a numbered citation marker.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentDto {
    Text { text: String },
    Marker { id: String, number: usize },
}

impl From<RenderedSegment> for SegmentDto {
    fn from(segment: RenderedSegment) -> Self {
        match segment {
            RenderedSegment::Text(text) => SegmentDto::Text { text },
            RenderedSegment::Marker { id, number } => SegmentDto::Marker { id, number },
        }
    }
}

#[derive(Serialize)]
pub struct RenderedReport {
    pub findings: Vec<SegmentDto>,
    pub impression: Vec<SegmentDto>,
    pub next_steps: Vec<SegmentDto>,
}

#[derive(Serialize)]
pub struct LatestReportResponse {
    #[serde(flatten)]
    pub report: Report,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered: Option<RenderedReport>,
}

/// `GET /api/patients/:id/reports/latest`
pub async fn latest(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<LatestReportQuery>,
) -> Result<Json<LatestReportResponse>, ApiError> {
    let patient_id = parse_id(&id, "patient")?;
    if ctx
        .with_conn(|conn| db::get_patient(conn, &patient_id))?
        .is_none()
    {
        return Err(ApiError::NotFound("Patient not found".into()));
    }

    let report = ctx
        .with_conn(|conn| db::latest_report_for_patient(conn, &patient_id))?
        .ok_or_else(|| ApiError::NotFound("No report exists for this patient".into()))?;

    // One numbering pass spans all three fields so markers stay stable
    // across the report.
    let rendered = query.rendered.then(|| {
        let mut numbering = DisplayNumbering::new();
        RenderedReport {
            findings: render_field(&report.payload.findings, &mut numbering),
            impression: render_field(&report.payload.impression, &mut numbering),
            next_steps: render_field(&report.payload.next_steps, &mut numbering),
        }
    });

    Ok(Json(LatestReportResponse { report, rendered }))
}

fn render_field(text: &str, numbering: &mut DisplayNumbering) -> Vec<SegmentDto> {
    citations::render_segments(text, numbering)
        .into_iter()
        .map(SegmentDto::from)
        .collect()
}
