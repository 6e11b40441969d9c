use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{
    transport_error, ChatTurn, ProviderError, ReplyStream, TextInference, VisionInference,
};
use crate::pipeline::prompts;

/// Buffered chunks between the SSE reader and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Client for the Gemini generative-language API.
///
/// Carries two model ids: a full-quality one for clinically sensitive
/// output and a fast one for rewrites and chat titles. Unary calls run
/// under the processing timeout; a streamed conversation runs under the
/// (shorter) chat timeout end to end.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    fast_model: String,
    processing_timeout: Duration,
    chat_timeout: Duration,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        fast_model: &str,
        processing_timeout: Duration,
        chat_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            fast_model: fast_model.to_string(),
            processing_timeout,
            chat_timeout,
        }
    }

    async fn request_text(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.processing_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(e, &url, self.processing_timeout.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        extract_candidate_text(parsed)
    }
}

// ── wire types ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
}

impl GenerateRequest {
    fn text(prompt: &str) -> Self {
        Self {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part::text(prompt)],
            }],
        }
    }

    fn text_with_image(prompt: &str, image_base64: &str) -> Self {
        Self {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part::text(prompt), Part::inline_jpeg(image_base64)],
            }],
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline_jpeg(base64: &str) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: "image/jpeg".into(),
                data: base64.to_string(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

/// Response shape shared by the unary route and each SSE event. The API
/// emits camelCase keys.
#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

fn joined_candidate_text(candidate: Candidate) -> Result<String, ProviderError> {
    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ProviderError::SafetyBlocked);
    }
    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();
    Ok(text)
}

/// Extract the full generated text from a unary response, failing closed
/// on safety blocks and empty candidates.
fn extract_candidate_text(response: GenerateResponse) -> Result<String, ProviderError> {
    if let Some(feedback) = &response.prompt_feedback {
        if feedback.block_reason.is_some() {
            return Err(ProviderError::SafetyBlocked);
        }
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("no candidates in response".into()))?;

    let text = joined_candidate_text(candidate)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "empty candidate content".into(),
        ));
    }
    Ok(text.to_string())
}

/// Decode one SSE data payload into a text chunk. `Ok(None)` means the
/// event carried no text (keep reading).
fn parse_stream_chunk(payload: &str) -> Result<Option<String>, ProviderError> {
    let event: GenerateResponse =
        serde_json::from_str(payload).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    if let Some(feedback) = &event.prompt_feedback {
        if feedback.block_reason.is_some() {
            return Err(ProviderError::SafetyBlocked);
        }
    }

    let Some(candidate) = event.candidates.into_iter().next() else {
        return Ok(None);
    };

    let text = joined_candidate_text(candidate)?;
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

/// Incremental splitter for `data: `-prefixed SSE lines. Transport chunks
/// can split lines, and multibyte characters, at any byte.
struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Absorb one transport chunk, returning completed data payloads.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(newline) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            if let Some(payload) = text.strip_prefix("data: ") {
                payloads.push(payload.to_string());
            }
        }
        payloads
    }
}

/// Forward SSE events from a streaming response into the reply channel.
/// Stops when the body ends, a terminal error is sent, or the receiver is
/// dropped (which also drops the HTTP response).
async fn forward_sse(response: reqwest::Response, tx: mpsc::Sender<Result<String, ProviderError>>) {
    let mut body = response.bytes_stream();
    let mut lines = SseLineBuffer::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(Err(ProviderError::HttpClient(e.to_string()))).await;
                return;
            }
        };

        for payload in lines.push(&chunk) {
            match parse_stream_chunk(&payload) {
                Ok(Some(text)) => {
                    if tx.send(Ok(text)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    let _ = tx.send(Err(error)).await;
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl TextInference for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.request_text(&self.model, &GenerateRequest::text(prompt))
            .await
    }

    async fn generate_fast(&self, prompt: &str) -> Result<String, ProviderError> {
        self.request_text(&self.fast_model, &GenerateRequest::text(prompt))
            .await
    }

    async fn generate_with_image(
        &self,
        prompt: &str,
        image_base64: &str,
    ) -> Result<String, ProviderError> {
        self.request_text(
            &self.model,
            &GenerateRequest::text_with_image(prompt, image_base64),
        )
        .await
    }

    async fn stream_conversation(
        &self,
        system_prompt: &str,
        turns: Vec<ChatTurn>,
    ) -> Result<ReplyStream, ProviderError> {
        let request = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(system_prompt)],
            }),
            contents: turns
                .iter()
                .map(|turn| Content {
                    role: Some(turn.role.as_str().to_string()),
                    parts: vec![Part::text(&turn.text)],
                })
                .collect(),
        };

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.base_url, self.model
        );
        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .timeout(self.chat_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, &url, self.chat_timeout.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(forward_sse(response, tx));
        Ok(rx)
    }
}

#[async_trait]
impl VisionInference for GeminiClient {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    async fn caption_image(&self, image_base64: &str) -> Result<String, ProviderError> {
        self.request_text(
            &self.model,
            &GenerateRequest::text_with_image(prompts::GENERAL_CAPTION_PROMPT, image_base64),
        )
        .await
    }

    async fn summarize_series(&self, captions: &[String]) -> Result<String, ProviderError> {
        self.request_text(
            &self.model,
            &GenerateRequest::text(&prompts::series_summary_prompt(captions)),
        )
        .await
    }
}
