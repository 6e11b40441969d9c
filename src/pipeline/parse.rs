//! Permissive JSON location in free-text model output.

/// Locate a JSON object in model output: a ` ```json ` fenced block when one
/// is present and closed, otherwise the largest brace-delimited substring.
pub fn extract_json_object(text: &str) -> Option<String> {
    if let Some(fence_start) = text.find("```json") {
        let content_start = fence_start + 7;
        if let Some(fence_end) = text[content_start..].find("```") {
            return Some(
                text[content_start..content_start + fence_end]
                    .trim()
                    .to_string(),
            );
        }
    }

    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if first < last {
        Some(text[first..=last].to_string())
    } else {
        None
    }
}
