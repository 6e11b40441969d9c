use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Synthetic citation key (`cite_1`, `cite_2`, …) → source study id.
/// First-seen order is carried by the numeric suffix, so plain map
/// iteration order is not load-bearing.
pub type CitationMap = BTreeMap<String, String>;

/// The structured payload produced by report synthesis. The three text
/// fields may embed `[CITE:id]` tokens; `citations` is derived from them,
/// never independently authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub findings: String,
    pub impression: String,
    pub next_steps: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icd10_codes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snomed_codes: Option<Vec<String>>,
    #[serde(default)]
    pub citations: CitationMap,
}

/// A persisted patient-level report. Multiple reports may exist per
/// patient; "latest" is determined by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub patient_id: Uuid,
    #[serde(flatten)]
    pub payload: ReportPayload,
    pub created_at: DateTime<Utc>,
}
