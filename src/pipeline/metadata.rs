//! Study metadata extraction from the first uploaded image.
//!
//! Title, imaging date, and modality are each optional conveniences with
//! different failure contracts: a failed title falls back to a fixed
//! placeholder, a failed date is surfaced so the caller can demand manual
//! entry, and a failed modality is simply absent.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use super::inference::{RetryPolicy, TextInference};
use super::parse;
use super::prompts;
use crate::models::FieldConfidence;

/// Title stored when generation fails or produces nothing usable.
pub const UNTITLED_STUDY: &str = "Untitled Study";

/// Modalities the extractor is prepared to accept from the model.
const VALID_MODALITIES: &[&str] = &[
    "CT", "MRI", "X-RAY", "US", "ULTRASOUND", "PET", "NM", "MG", "FL", "DEXA", "CR", "DX",
];

/// Outcome of imaging-date extraction. `Failed` covers provider failure, a
/// `none` confidence verdict, and an unparseable date alike; the caller
/// decides whether that is fatal for the request.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedDate {
    Found {
        datetime: DateTime<Utc>,
        confidence: FieldConfidence,
    },
    Failed,
}

pub struct MetadataExtractor {
    text: Arc<dyn TextInference>,
    retry: RetryPolicy,
}

impl MetadataExtractor {
    pub fn new(text: Arc<dyn TextInference>, retry: RetryPolicy) -> Self {
        Self { text, retry }
    }

    /// Generate a 3-8 word title from the study's first image. Never fails;
    /// an unusable answer falls back to [`UNTITLED_STUDY`].
    pub async fn study_title(&self, image_base64: &str, modality: Option<&str>) -> String {
        let prompt = prompts::study_title_prompt(modality);
        match self
            .retry
            .run("study_title", || {
                self.text.generate_with_image(&prompt, image_base64)
            })
            .await
        {
            Ok(raw) => {
                let title = tidy_title(&raw);
                if title.is_empty() {
                    UNTITLED_STUDY.to_string()
                } else {
                    title
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Title generation failed, using fallback");
                UNTITLED_STUDY.to_string()
            }
        }
    }

    /// Read the imaging/acquisition date off the study's first image.
    pub async fn imaging_date(&self, image_base64: &str) -> ExtractedDate {
        match self
            .retry
            .run("imaging_date", || {
                self.text
                    .generate_with_image(prompts::DATE_EXTRACTION_PROMPT, image_base64)
            })
            .await
        {
            Ok(raw) => parse_date_response(&raw),
            Err(error) => {
                tracing::warn!(error = %error, "Date extraction failed");
                ExtractedDate::Failed
            }
        }
    }

    /// Identify the imaging modality. Failure is non-fatal and reported as
    /// `None`.
    pub async fn imaging_modality(&self, image_base64: &str) -> Option<String> {
        match self
            .retry
            .run("imaging_modality", || {
                self.text
                    .generate_with_image(prompts::MODALITY_EXTRACTION_PROMPT, image_base64)
            })
            .await
        {
            Ok(raw) => normalize_modality(&raw),
            Err(error) => {
                tracing::warn!(error = %error, "Modality extraction failed");
                None
            }
        }
    }
}

fn tidy_title(raw: &str) -> String {
    let title = raw.trim();
    let title = title.strip_prefix('"').unwrap_or(title);
    let title = title.strip_suffix('"').unwrap_or(title);
    let title = title.strip_prefix('\'').unwrap_or(title);
    let title = title.strip_suffix('\'').unwrap_or(title);
    let title = title.strip_suffix('.').unwrap_or(title);
    title.trim().to_string()
}

#[derive(Deserialize)]
struct DateExtractionPayload {
    date: Option<String>,
    confidence: Option<String>,
}

fn parse_date_response(raw: &str) -> ExtractedDate {
    let Some(json) = parse::extract_json_object(raw) else {
        return ExtractedDate::Failed;
    };

    let payload: DateExtractionPayload = match serde_json::from_str(&json) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(error = %error, "Unparseable date extraction payload");
            return ExtractedDate::Failed;
        }
    };

    let confidence = payload
        .confidence
        .as_deref()
        .and_then(|c| c.parse::<FieldConfidence>().ok())
        .unwrap_or(FieldConfidence::None);
    if !confidence.is_usable() {
        return ExtractedDate::Failed;
    }

    match payload.date.as_deref().and_then(parse_extracted_datetime) {
        Some(datetime) => ExtractedDate::Found {
            datetime,
            confidence,
        },
        None => ExtractedDate::Failed,
    }
}

/// Accept the two formats the prompt requests: a bare date, or a date with
/// an HH:mm time.
fn parse_extracted_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn normalize_modality(raw: &str) -> Option<String> {
    let modality = raw.trim().to_uppercase();
    if !VALID_MODALITIES.contains(&modality.as_str()) {
        return None;
    }
    let normalized = match modality.as_str() {
        "ULTRASOUND" => "US",
        "X-RAY" | "CR" | "DX" => "X-Ray",
        other => other,
    };
    Some(normalized.to_string())
}
