//! Prompt texts and builders for every model-facing operation.
//!
//! All prompt wording lives here so the pipeline components stay free of
//! string templates and the citation grammar is taught from exactly one
//! place.

use crate::models::{Patient, ReportPayload, Study};

// ── image captioning ────────────────────────────────────────────────────

pub const SPECIALIZED_CAPTION_SYSTEM: &str = "You are an expert medical radiologist. \
Analyze medical images and provide detailed, accurate descriptions of findings.";

pub const SPECIALIZED_CAPTION_USER: &str = "Describe this medical image in detail, \
including any notable findings, anatomical structures, and potential abnormalities.";

pub const GENERAL_CAPTION_PROMPT: &str = r#"You are an expert radiologist analyzing medical images. Provide a detailed, technical description of the medical image including:
1. Anatomical structures visible
2. Imaging plane/view
3. Any notable findings or abnormalities
4. Technical quality of the image
5. Any contrast or special techniques used

Be specific and use proper medical terminology. This caption will be used for further AI analysis.

Analyze this medical image and provide a comprehensive technical description."#;

/// Refine one raw slice caption, given its position in the study.
pub fn caption_enhancement_prompt(
    raw_caption: &str,
    slice_number: usize,
    total_slices: usize,
) -> String {
    format!(
        r#"You are an expert radiologist reviewing an AI-generated description of one slice from a medical imaging study.

Original description (slice {slice_number} of {total_slices}):
{raw_caption}

Rewrite this description to be clearer and more clinically precise:
1. Keep every finding from the original; do not add findings that are not described
2. Use proper radiological terminology
3. Note the slice position where it is relevant to the findings
4. Remove hedging and filler while preserving stated uncertainty

Return only the improved description, nothing else."#
    )
}

// ── series summarization ────────────────────────────────────────────────

fn numbered_slices(captions: &[String]) -> String {
    captions
        .iter()
        .enumerate()
        .map(|(i, caption)| format!("Slice {}: {}", i + 1, caption))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Study-level summary over raw slice captions.
pub fn series_summary_prompt(captions: &[String]) -> String {
    format!(
        r#"You are an expert radiologist. Given the following medical image slice descriptions from a single imaging study, produce a concise study-level summary that captures the key findings, anatomical observations, and any potential abnormalities.

Slice Descriptions:
{slices}

Provide a comprehensive yet concise summary that:
1. Synthesizes findings across all slices
2. Highlights the most significant observations
3. Notes any abnormalities or pathological findings
4. Maintains proper medical terminology
5. Follows standard radiology reporting conventions

Study Summary:"#,
        slices = numbered_slices(captions)
    )
}

/// Study-level summary over enhanced captions, anchored to the study title
/// and modality.
pub fn enhanced_summary_prompt(
    title: &str,
    modality: Option<&str>,
    captions: &[String],
) -> String {
    let modality_line = modality
        .map(|m| format!("\nImaging modality: {m}"))
        .unwrap_or_default();
    format!(
        r#"You are an expert radiologist. The following are refined descriptions of each slice from the imaging study "{title}".{modality_line}

Slice Descriptions:
{slices}

Produce a concise study-level summary that:
1. Synthesizes findings across all slices
2. Highlights the most significant observations
3. Notes any abnormalities or pathological findings
4. Maintains proper medical terminology
5. Follows standard radiology reporting conventions

Study Summary:"#,
        slices = numbered_slices(captions)
    )
}

// ── study metadata extraction ───────────────────────────────────────────

pub fn study_title_prompt(modality: Option<&str>) -> String {
    let modality_line = modality
        .map(|m| format!("\nImaging modality: {m}\n"))
        .unwrap_or_default();
    format!(
        r#"You are an expert radiologist. Based on the provided medical image, generate a concise and descriptive title for this imaging study. The title should identify:
1. The body part or region imaged
2. The imaging technique or view (if apparent)
3. Any contrast or special techniques used (if visible)

The title should be professional, concise (3-8 words), and follow standard medical imaging naming conventions.
Examples: "Chest PA and Lateral", "Brain MRI with Contrast", "Abdominal CT Angiography", "Left Knee AP and Lateral"
{modality_line}
Analyze this medical image and provide only the title, nothing else."#
    )
}

pub const DATE_EXTRACTION_PROMPT: &str = r#"You are an expert at reading medical imaging reports and extracting dates. Look for the imaging date/acquisition date in the provided medical image. Common locations include:
1. Top or bottom corners of the image
2. Header information
3. DICOM overlay text
4. Printed report sections

Extract the date and convert it to ISO format (YYYY-MM-DD). If a time is also visible, include it (YYYY-MM-DDTHH:mm).

Analyze this medical image and extract the imaging/acquisition date. Return a JSON response with:
{
  "date": "YYYY-MM-DD or YYYY-MM-DDTHH:mm format, or null if not found",
  "confidence": "high/medium/low/none",
  "original_format": "the date as it appears in the image (if found)"
}"#;

pub const MODALITY_EXTRACTION_PROMPT: &str = r#"You are an expert radiologist. Based on the provided medical image, identify the imaging modality. Common modalities include:
1. CT (Computed Tomography)
2. MRI (Magnetic Resonance Imaging)
3. X-Ray (Radiography)
4. US/Ultrasound
5. PET (Positron Emission Tomography)
6. NM (Nuclear Medicine)
7. MG (Mammography)
8. FL (Fluoroscopy)
9. DEXA (Bone Densitometry)

Look for visual cues like:
- Image characteristics (contrast, resolution, appearance)
- Any text overlays mentioning the modality
- Technical parameters displayed on the image
- Characteristic image features of each modality

Analyze this medical image and identify the imaging modality. Return ONLY the modality abbreviation (e.g., CT, MRI, X-Ray, US) or null if you cannot determine it."#;

// ── report synthesis ────────────────────────────────────────────────────

pub const REPORT_PERSONA: &str = "You are an expert radiologist with extensive experience \
in interpreting medical imaging studies. You provide comprehensive, accurate, and \
clinically relevant reports that help guide patient care.";

/// Full report-synthesis prompt. `data_json` is the serialized patient and
/// study block including the requested output schema.
pub fn report_prompt(data_json: &str, study_ids: &[String]) -> String {
    let ids = study_ids.join(", ");
    format!(
        r#"{REPORT_PERSONA}

Based on the following patient information and imaging studies, generate a comprehensive radiology report.

IMPORTANT: Every clinical statement must cite the study it is based on, using the format [CITE:study_id]. For comparative statements drawing on several studies, cite them together like [CITE:study1_id,study2_id]. The valid study ids for this patient are: {ids}.

Patient Information and Studies:
{data_json}

Return a JSON response exactly matching the requested_schema format. Be thorough but concise, ensure all findings are clinically relevant, and do not report findings that the study summaries do not support."#
    )
}

// ── conversation ────────────────────────────────────────────────────────

/// System prompt grounding a follow-up conversation in the patient's
/// studies and latest report.
pub fn conversation_system_prompt(
    patient: &Patient,
    studies: &[Study],
    report: Option<&ReportPayload>,
) -> String {
    let studies_block = studies
        .iter()
        .enumerate()
        .map(|(i, study)| {
            format!(
                "\nStudy {n}:\n- ID: {id}\n- Title: {title}\n- Modality: {modality}\n- Date: {date}\n- Summary: {summary}",
                n = i + 1,
                id = study.id,
                title = study.title,
                modality = study.modality.as_deref().unwrap_or("Not specified"),
                date = study.imaging_datetime.format("%Y-%m-%d"),
                summary = study.series_summary,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let report_block = match report {
        Some(payload) => format!(
            "Latest Comprehensive Report:\nFindings:\n{}\n\nImpression:\n{}\n\nNext Steps/Recommendations:\n{}",
            payload.findings, payload.impression, payload.next_steps
        ),
        None => "No comprehensive report is available yet for this patient.".to_string(),
    };

    format!(
        r#"You are ChronoScan AI, a helpful medical assistant. Your role is to discuss the patient's medical information based *solely* on the context provided below. Do not infer, speculate, or provide medical advice beyond what is explicitly stated in the reports and summaries.

IMPORTANT: When referencing information from specific studies, you MUST include citations in the format [CITE:study_id]. For example, if referencing information from study with ID "abc123", write [CITE:abc123]. You can cite multiple studies like [CITE:study1_id,study2_id].

Patient Information:
- Name: {name}
- Age: {age}
- Sex: {sex}
- Reason for Imaging: {reason}

Imaging Studies (in chronological order):
{studies_block}

{report_block}

---
Based on this information, please answer the user's questions. Always cite the specific study IDs when referring to information from particular studies. If the information is not available in the provided context, state that clearly."#,
        name = patient.name,
        age = patient.age,
        sex = patient.sex,
        reason = patient.reason_for_imaging.as_deref().unwrap_or("Not specified"),
    )
}

// ── chat titles ─────────────────────────────────────────────────────────

/// Title prompt over an early-conversation transcript.
pub fn chat_title_prompt(transcript: &str) -> String {
    format!(
        r#"Based on this medical conversation, generate a very concise and short title (max 5-7 words, ideally 3-4 words, absolute max 50 characters) that captures the main topic or question. The title should be extremely brief and help quickly identify the conversation.

Conversation:
{transcript}

Generate only the title, nothing else. Be very brief."#
    )
}
