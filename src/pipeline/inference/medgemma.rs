use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{transport_error, ProviderError, VisionInference};
use crate::pipeline::prompts;

/// Token budget for a single caption.
const CAPTION_MAX_TOKENS: u32 = 256;
/// Token budget for a study-level summary.
const SUMMARY_MAX_TOKENS: u32 = 1024;

/// Client for a dedicated MedGemma deployment behind a Vertex-style
/// `:predict` route speaking the chat-completions instance format.
pub struct MedGemmaClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    timeout_secs: u64,
}

impl MedGemmaClient {
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    }

    async fn predict(
        &self,
        messages: Vec<PredictMessage>,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let body = PredictRequest {
            instances: vec![PredictInstance {
                request_format: "chatCompletions",
                messages,
                max_tokens,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, &self.endpoint, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        extract_prediction_text(&parsed)
    }
}

/// Request body for the `:predict` route.
#[derive(Serialize)]
struct PredictRequest {
    instances: Vec<PredictInstance>,
}

#[derive(Serialize)]
struct PredictInstance {
    #[serde(rename = "@requestFormat")]
    request_format: &'static str,
    messages: Vec<PredictMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct PredictMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

fn system_message(text: &str) -> PredictMessage {
    PredictMessage {
        role: "system",
        content: vec![ContentPart::Text {
            text: text.to_string(),
        }],
    }
}

/// Pull the generated text out of a prediction payload.
///
/// Two shapes are served depending on deployment: a nested array with the
/// text at `predictions[0][0].message.content`, and a chat-completions
/// object with it at `predictions.choices[0].message.content`. Anything
/// else is rejected rather than coerced into an empty caption.
fn extract_prediction_text(body: &Value) -> Result<String, ProviderError> {
    let predictions = body
        .get("predictions")
        .ok_or_else(|| ProviderError::MalformedResponse("missing predictions field".into()))?;

    let choice = predictions
        .get(0)
        .and_then(|row| row.get(0))
        .or_else(|| predictions.get("choices").and_then(|c| c.get(0)));

    let content = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::MalformedResponse("unexpected predictions shape".into()))?;

    let content = content.trim();
    if content.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "empty prediction content".into(),
        ));
    }
    Ok(content.to_string())
}

#[async_trait]
impl VisionInference for MedGemmaClient {
    fn provider_name(&self) -> &'static str {
        "medgemma"
    }

    async fn caption_image(&self, image_base64: &str) -> Result<String, ProviderError> {
        let messages = vec![
            system_message(prompts::SPECIALIZED_CAPTION_SYSTEM),
            PredictMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompts::SPECIALIZED_CAPTION_USER.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/jpeg;base64,{image_base64}"),
                        },
                    },
                ],
            },
        ];
        self.predict(messages, CAPTION_MAX_TOKENS).await
    }

    async fn summarize_series(&self, captions: &[String]) -> Result<String, ProviderError> {
        let messages = vec![
            system_message(prompts::SPECIALIZED_CAPTION_SYSTEM),
            PredictMessage {
                role: "user",
                content: vec![ContentPart::Text {
                    text: prompts::series_summary_prompt(captions),
                }],
            },
        ];
        self.predict(messages, SUMMARY_MAX_TOKENS).await
    }
}
