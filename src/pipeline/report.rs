//! Patient-level report synthesis.
//!
//! One structured prompt over all of a patient's study summaries yields a
//! findings / impression / next-steps report whose clinical statements carry
//! inline citation tokens. The citation map is derived from those tokens
//! after parsing, never authored by the model.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::report::CitationMap;
use crate::models::{Patient, ReportPayload, Study};
use crate::pipeline::citations;
use crate::pipeline::inference::{ProviderError, RetryPolicy, TextInference};
use crate::pipeline::{parse, prompts};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to encode report data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Report response was not usable: {0}")]
    UnparseableReport(String),
}

/// The prompt's data block, serialized verbatim into the request.
#[derive(Serialize)]
struct ReportData<'a> {
    patient_demo: PatientDemo<'a>,
    studies: Vec<StudyEntry<'a>>,
    requested_schema: RequestedSchema,
}

#[derive(Serialize)]
struct PatientDemo<'a> {
    name: &'a str,
    age: i64,
    sex: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct StudyEntry<'a> {
    id: String,
    title: &'a str,
    date: String,
    summary: &'a str,
}

/// Field-by-field description of the expected output, mirrored by
/// [`RawReport`] on the way back in.
#[derive(Serialize)]
struct RequestedSchema {
    findings: &'static str,
    impression: &'static str,
    next_steps: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    icd10_codes: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snomed_codes: Option<&'static str>,
}

impl RequestedSchema {
    fn new(include_codes: bool) -> Self {
        Self {
            findings: "Detailed description of all relevant findings across all studies, \
                       noting any changes over time",
            impression: "Concise summary of the most important findings and their clinical \
                         significance",
            next_steps: "Recommended follow-up actions, additional imaging, or clinical \
                         interventions",
            icd10_codes: include_codes.then_some("Array of relevant ICD-10 diagnosis codes"),
            snomed_codes: include_codes.then_some("Array of relevant SNOMED CT codes"),
        }
    }
}

/// Model output before validation. Everything optional so a missing field
/// is our decision to reject, not a serde error with a cryptic message.
#[derive(Deserialize)]
struct RawReport {
    findings: Option<String>,
    impression: Option<String>,
    next_steps: Option<String>,
    #[serde(default)]
    icd10_codes: Option<Vec<String>>,
    #[serde(default)]
    snomed_codes: Option<Vec<String>>,
}

pub struct ReportSynthesizer {
    text: Arc<dyn TextInference>,
    retry: RetryPolicy,
}

impl ReportSynthesizer {
    pub fn new(text: Arc<dyn TextInference>, retry: RetryPolicy) -> Self {
        Self { text, retry }
    }

    /// Synthesize a holistic report over the patient's studies.
    ///
    /// Studies are presented chronologically regardless of input order. The
    /// returned payload carries the citation map derived from the generated
    /// text; unknown cited ids are logged but kept so the map always matches
    /// the text.
    pub async fn synthesize(
        &self,
        patient: &Patient,
        studies: &[Study],
        include_codes: bool,
    ) -> Result<ReportPayload, ReportError> {
        let mut ordered: Vec<&Study> = studies.iter().collect();
        ordered.sort_by_key(|s| s.imaging_datetime);

        let study_ids: Vec<String> = ordered.iter().map(|s| s.id.to_string()).collect();
        let data = ReportData {
            patient_demo: PatientDemo {
                name: &patient.name,
                age: patient.age,
                sex: &patient.sex,
                reason: patient
                    .reason_for_imaging
                    .as_deref()
                    .unwrap_or("Not specified"),
            },
            studies: ordered
                .iter()
                .map(|study| StudyEntry {
                    id: study.id.to_string(),
                    title: &study.title,
                    date: study.imaging_datetime.to_rfc3339(),
                    summary: &study.series_summary,
                })
                .collect(),
            requested_schema: RequestedSchema::new(include_codes),
        };
        let data_json = serde_json::to_string_pretty(&data)?;

        let prompt = prompts::report_prompt(&data_json, &study_ids);
        let response = self
            .retry
            .run("report_synthesis", || self.text.generate(&prompt))
            .await?;
        tracing::info!(
            patient_id = %patient.id,
            studies = study_ids.len(),
            include_codes,
            "Report generated"
        );

        let mut payload = parse_report(&response, include_codes)?;
        payload.citations = citations::build_citation_map(&[
            &payload.findings,
            &payload.impression,
            &payload.next_steps,
        ]);
        citations::warn_unknown_citations(&payload.citations, &study_ids);
        Ok(payload)
    }
}

fn parse_report(response: &str, include_codes: bool) -> Result<ReportPayload, ReportError> {
    let json = parse::extract_json_object(response)
        .ok_or_else(|| ReportError::UnparseableReport("no JSON object in response".into()))?;
    let raw: RawReport = serde_json::from_str(&json)
        .map_err(|e| ReportError::UnparseableReport(e.to_string()))?;

    Ok(ReportPayload {
        findings: mandatory(raw.findings, "findings")?,
        impression: mandatory(raw.impression, "impression")?,
        next_steps: mandatory(raw.next_steps, "next_steps")?,
        icd10_codes: include_codes.then(|| raw.icd10_codes.unwrap_or_default()),
        snomed_codes: include_codes.then(|| raw.snomed_codes.unwrap_or_default()),
        citations: CitationMap::new(),
    })
}

fn mandatory(field: Option<String>, name: &str) -> Result<String, ReportError> {
    match field {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ReportError::UnparseableReport(format!(
            "missing mandatory field: {name}"
        ))),
    }
}
