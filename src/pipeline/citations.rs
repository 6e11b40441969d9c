//! Inline citation protocol.
//!
//! Generated prose grounds clinical statements in source studies with
//! `[CITE:id]` and `[CITE:id1,id2]` tokens. This module is the only place
//! that scans, numbers, and renders those tokens; report rendering and chat
//! rendering both consume it.

use regex::Regex;

use crate::models::CitationMap;

const CITATION_PATTERN: &str = r"\[CITE:([^\]]+)\]";

/// One citation token as written in generated prose.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationToken {
    /// Verbatim token text, brackets included.
    pub token: String,
    /// Study ids listed in the token, in written order.
    pub ids: Vec<String>,
}

/// Scan `text` left to right for citation tokens.
///
/// Malformed tokens (an unterminated `[CITE:` or an all-whitespace id list)
/// do not match and stay literal text.
pub fn extract_citations(text: &str) -> Vec<CitationToken> {
    let pattern = Regex::new(CITATION_PATTERN).unwrap();

    pattern
        .captures_iter(text)
        .filter_map(|cap| {
            let token = cap.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
            let ids = split_ids(cap.get(1).map(|m| m.as_str()).unwrap_or(""));
            if ids.is_empty() {
                None
            } else {
                Some(CitationToken { token, ids })
            }
        })
        .collect()
}

fn split_ids(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Display numbering for citation markers.
///
/// The first time a distinct id is seen it receives the next integer
/// starting at 1; later repeats reuse their number. One instance spans a
/// whole rendered artifact so numbers stay stable across report fields.
#[derive(Debug, Default)]
pub struct DisplayNumbering {
    numbers: Vec<(String, usize)>,
}

impl DisplayNumbering {
    pub fn new() -> Self {
        Self::default()
    }

    fn assign(&mut self, id: &str) -> usize {
        if let Some((_, number)) = self.numbers.iter().find(|(known, _)| known == id) {
            return *number;
        }
        let number = self.numbers.len() + 1;
        self.numbers.push((id.to_string(), number));
        number
    }

    /// Ids seen so far with their display numbers, in assignment order.
    pub fn numbers(&self) -> &[(String, usize)] {
        &self.numbers
    }
}

/// A run of pass-through text or one numbered citation marker.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedSegment {
    Text(String),
    Marker { id: String, number: usize },
}

/// Split `text` into pass-through runs and numbered markers, assigning
/// numbers through `numbering`. A token citing several ids yields that many
/// adjacent markers.
pub fn render_segments(text: &str, numbering: &mut DisplayNumbering) -> Vec<RenderedSegment> {
    let pattern = Regex::new(CITATION_PATTERN).unwrap();
    let mut segments = Vec::new();
    let mut cursor = 0;

    for cap in pattern.captures_iter(text) {
        let Some(matched) = cap.get(0) else { continue };
        let ids = split_ids(cap.get(1).map(|m| m.as_str()).unwrap_or(""));
        if ids.is_empty() {
            // leave tokens with no usable ids as literal text
            continue;
        }

        if matched.start() > cursor {
            segments.push(RenderedSegment::Text(text[cursor..matched.start()].to_string()));
        }
        for id in ids {
            let number = numbering.assign(&id);
            segments.push(RenderedSegment::Marker { id, number });
        }
        cursor = matched.end();
    }

    if cursor < text.len() {
        segments.push(RenderedSegment::Text(text[cursor..].to_string()));
    }
    segments
}

/// Render `text` with numbered markers in place of citation tokens,
/// joining adjacent markers with a comma: `[CITE:a,b]` becomes `[1],[2]`.
pub fn render_text(text: &str, numbering: &mut DisplayNumbering) -> String {
    let mut rendered = String::with_capacity(text.len());
    let mut previous_was_marker = false;

    for segment in render_segments(text, numbering) {
        match segment {
            RenderedSegment::Text(run) => {
                rendered.push_str(&run);
                previous_was_marker = false;
            }
            RenderedSegment::Marker { number, .. } => {
                if previous_was_marker {
                    rendered.push(',');
                }
                rendered.push_str(&format!("[{number}]"));
                previous_was_marker = true;
            }
        }
    }
    rendered
}

/// Derive the persisted citation map: a fresh `cite_N` key per distinct id
/// in first-seen order across all citation-bearing fields, independent of
/// repetition count. Display numbering is presentation-only and recomputed
/// per render; this map is the canonical registry of cited studies.
pub fn build_citation_map(fields: &[&str]) -> CitationMap {
    let mut map = CitationMap::new();
    let mut distinct = 0usize;

    for field in fields {
        for token in extract_citations(field) {
            for id in token.ids {
                if map.values().any(|existing| existing == &id) {
                    continue;
                }
                distinct += 1;
                map.insert(format!("cite_{distinct}"), id);
            }
        }
    }
    map
}

/// Log citation ids that do not resolve to any of the patient's studies.
///
/// The map is left intact so it keeps matching the persisted text; a
/// consumer rendering a dead reference degrades to showing the raw id.
pub fn warn_unknown_citations(map: &CitationMap, known_ids: &[String]) {
    for id in map.values() {
        if !known_ids.iter().any(|known| known == id) {
            tracing::warn!(study_id = %id, "Citation references unknown study");
        }
    }
}
