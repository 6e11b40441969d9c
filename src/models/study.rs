use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::StudyProcessingState;

/// One imaging encounter: an ordered series of slices plus a derived,
/// regenerable series summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub title: String,
    pub modality: Option<String>,
    pub imaging_datetime: DateTime<Utc>,
    /// Derived artifact. Never the source of truth — regenerable at any
    /// time from the slices' captions.
    pub series_summary: String,
    /// Whether report synthesis should request ICD-10/SNOMED code lists.
    pub include_codes: bool,
    pub processing_state: StudyProcessingState,
    pub created_at: DateTime<Utc>,
}

/// One slice within a study. `slice_index` is zero-based, contiguous and
/// unique within the study, stable once assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyImage {
    pub id: Uuid,
    pub study_id: Uuid,
    /// Opaque object-store reference for the normalized JPEG.
    pub blob_ref: String,
    pub slice_index: i64,
    pub raw_caption: String,
    /// Readability rewrite of the raw caption; falls back to raw when absent.
    pub enhanced_caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StudyImage {
    /// Caption to feed into study-level aggregation: enhanced when present.
    pub fn display_caption(&self) -> &str {
        self.enhanced_caption.as_deref().unwrap_or(&self.raw_caption)
    }
}
