//! Study endpoints: multipart upload, detail, refresh, delete.
//!
//! Upload drives the whole captioning pipeline inline: validate the form,
//! resolve title/date/modality (manual values win over auto-extraction),
//! persist the study row, then hand the image bytes to `CaptionPipeline`.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::api::endpoints::parse_id;
use crate::api::error::ApiError;
use crate::api::types::AppContext;
use crate::db;
use crate::imaging;
use crate::models::enums::StudyProcessingState;
use crate::models::{Study, StudyImage};
use crate::pipeline::metadata::{ExtractedDate, UNTITLED_STUDY};
use crate::storage::study_prefix;

/// Upper bound on slices per study; uploads beyond this are rejected.
pub const MAX_IMAGES_PER_STUDY: usize = 100;

#[derive(Serialize)]
pub struct StudyDetail {
    #[serde(flatten)]
    pub study: Study,
    /// Slices in `slice_index` order.
    pub images: Vec<StudyImage>,
}

#[derive(Default)]
struct UploadForm {
    patient_id: Option<String>,
    title: Option<String>,
    imaging_datetime: Option<String>,
    modality: Option<String>,
    auto_title: bool,
    auto_date: bool,
    auto_modality: bool,
    include_codes: bool,
    files: Vec<Vec<u8>>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "patient_id" => form.patient_id = Some(read_text(field).await?),
            "title" => form.title = Some(read_text(field).await?),
            "imaging_datetime" => form.imaging_datetime = Some(read_text(field).await?),
            "modality" => form.modality = Some(read_text(field).await?),
            "auto_title" => form.auto_title = read_flag(field).await?,
            "auto_date" => form.auto_date = read_flag(field).await?,
            "auto_modality" => form.auto_modality = read_flag(field).await?,
            "include_codes" => form.include_codes = read_flag(field).await?,
            name if name.starts_with("file") => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                if !imaging::is_supported_content_type(&content_type) {
                    return Err(ApiError::BadRequest(format!(
                        "Unsupported image format: {content_type}"
                    )));
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;
                if bytes.is_empty() {
                    return Err(ApiError::BadRequest("Empty image upload".into()));
                }
                form.files.push(bytes.to_vec());
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed form field: {e}")))
}

async fn read_flag(field: axum::extract::multipart::Field<'_>) -> Result<bool, ApiError> {
    let raw = read_text(field).await?;
    Ok(matches!(raw.trim(), "true" | "1"))
}

/// Accept RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
fn parse_imaging_datetime(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Ok(datetime.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(ApiError::BadRequest(format!(
        "Invalid imaging_datetime: {raw}"
    )))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `POST /api/studies` — multipart upload creating and processing a study.
pub async fn create(
    State(ctx): State<AppContext>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<StudyDetail>), ApiError> {
    let form = read_form(multipart).await?;

    let patient_id = parse_id(
        form.patient_id
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("patient_id is required".into()))?,
        "patient",
    )?;
    let patient = ctx
        .with_conn(|conn| db::get_patient(conn, &patient_id))?
        .ok_or_else(|| ApiError::NotFound("Patient not found".into()))?;

    if form.files.is_empty() {
        return Err(ApiError::BadRequest("At least one image is required".into()));
    }
    if form.files.len() > MAX_IMAGES_PER_STUDY {
        return Err(ApiError::BadRequest(format!(
            "Too many images: {} (maximum {MAX_IMAGES_PER_STUDY})",
            form.files.len()
        )));
    }

    // Metadata extraction reads only the first slice.
    let first_base64 = if form.auto_title || form.auto_date || form.auto_modality {
        Some(
            imaging::normalize_image(&form.files[0])
                .map_err(|e| ApiError::BadRequest(format!("Invalid image: {e}")))?
                .base64,
        )
    } else {
        None
    };

    let manual_date = non_empty(form.imaging_datetime)
        .map(|raw| parse_imaging_datetime(&raw))
        .transpose()?;
    let imaging_datetime = match (manual_date, first_base64.as_deref()) {
        (Some(datetime), _) => datetime,
        (None, Some(base64)) if form.auto_date => match ctx.metadata.imaging_date(base64).await {
            ExtractedDate::Found { datetime, .. } => datetime,
            ExtractedDate::Failed => return Err(ApiError::ManualDateRequired),
        },
        _ => Utc::now(),
    };

    let modality = match (non_empty(form.modality), first_base64.as_deref()) {
        (Some(modality), _) => Some(modality),
        (None, Some(base64)) if form.auto_modality => ctx.metadata.imaging_modality(base64).await,
        _ => None,
    };

    let title = match (non_empty(form.title), first_base64.as_deref()) {
        (Some(title), _) => title,
        (None, Some(base64)) if form.auto_title => {
            ctx.metadata.study_title(base64, modality.as_deref()).await
        }
        _ => UNTITLED_STUDY.to_string(),
    };

    let study = Study {
        id: Uuid::new_v4(),
        patient_id: patient.id,
        title,
        modality,
        imaging_datetime,
        series_summary: String::new(),
        include_codes: form.include_codes,
        processing_state: StudyProcessingState::Created,
        created_at: Utc::now(),
    };
    ctx.with_conn(|conn| db::insert_study(conn, &study))?;

    if let Err(error) = ctx
        .captioning
        .process_upload(&ctx.db, &study, form.files)
        .await
    {
        // Provider trouble degrades to sentinels inside the pipeline, so an
        // error here is infrastructure: mark the study failed and surface it.
        if let Err(update_error) = ctx.with_conn(|conn| {
            db::update_study_state(conn, &study.id, StudyProcessingState::Failed)
        }) {
            tracing::error!(study_id = %study.id, error = %update_error, "Failed to mark study failed");
        }
        return Err(error.into());
    }

    let detail = load_detail(&ctx, &study.id)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `GET /api/studies/:id`
pub async fn detail(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StudyDetail>, ApiError> {
    let id = parse_id(&id, "study")?;
    Ok(Json(load_detail(&ctx, &id)?))
}

/// `POST /api/studies/:id/refresh` — re-derive captions and summary from
/// the stored blobs.
pub async fn refresh(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StudyDetail>, ApiError> {
    let id = parse_id(&id, "study")?;
    let study = ctx
        .with_conn(|conn| db::get_study(conn, &id))?
        .ok_or_else(|| ApiError::NotFound("Study not found".into()))?;

    ctx.captioning.refresh_study(&ctx.db, &study).await?;
    Ok(Json(load_detail(&ctx, &id)?))
}

/// `DELETE /api/studies/:id` — cascade delete plus storage purge.
pub async fn remove(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "study")?;
    let study = ctx
        .with_conn(|conn| db::get_study(conn, &id))?
        .ok_or_else(|| ApiError::NotFound("Study not found".into()))?;

    ctx.with_conn(|conn| db::delete_study(conn, &id))?;
    ctx.store.delete_prefix(&study_prefix(&study.patient_id, &id));
    tracing::info!(study_id = %id, "Study deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn load_detail(ctx: &AppContext, id: &Uuid) -> Result<StudyDetail, ApiError> {
    let study = ctx
        .with_conn(|conn| db::get_study(conn, id))?
        .ok_or_else(|| ApiError::NotFound("Study not found".into()))?;
    let images = ctx.with_conn(|conn| db::list_images_for_study(conn, id))?;
    Ok(StudyDetail { study, images })
}
