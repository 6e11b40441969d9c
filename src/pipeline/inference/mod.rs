//! Inference provider seam.
//!
//! Two capability traits split the provider surface: [`VisionInference`] for
//! image captioning and series summarization (both serving tiers implement
//! it), and [`TextInference`] for text generation, multimodal metadata
//! extraction, and streaming conversation (general tier only). Pipeline
//! components hold `Arc<dyn ...>` handles so tests can swap in mocks.

pub mod fallback;
pub mod gemini;
pub mod medgemma;
pub mod retry;

pub use fallback::*;
pub use gemini::*;
pub use medgemma::*;
pub use retry::*;

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Provider unreachable at {0}")]
    Unreachable(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Provider returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response blocked by provider safety filters")]
    SafetyBlocked,

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ProviderError {
    /// Whether a retry against the same provider could plausibly succeed.
    ///
    /// Transport failures and throttling/server statuses qualify. Safety
    /// blocks, malformed payloads, and bad input are deterministic and must
    /// not be replayed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Unreachable(_) | ProviderError::Timeout(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Map a reqwest transport failure onto the provider error taxonomy.
pub(crate) fn transport_error(err: reqwest::Error, endpoint: &str, timeout_secs: u64) -> ProviderError {
    if err.is_connect() {
        ProviderError::Unreachable(endpoint.to_string())
    } else if err.is_timeout() {
        ProviderError::Timeout(timeout_secs)
    } else {
        ProviderError::HttpClient(err.to_string())
    }
}

/// Conversation role in the provider's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}

/// One turn of a conversation as handed to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

/// Streamed reply chunks from a conversational model.
///
/// Dropping the receiver cancels the producer task, which in turn drops the
/// underlying HTTP response.
pub type ReplyStream = tokio::sync::mpsc::Receiver<Result<String, ProviderError>>;

/// A provider that can describe medical images.
///
/// Both the specialized captioner and the general fallback implement this;
/// [`FallbackChain`] composes the two.
#[async_trait]
pub trait VisionInference: Send + Sync {
    /// Short provider label used in tier logging.
    fn provider_name(&self) -> &'static str;

    /// Caption one normalized JPEG, passed as base64.
    async fn caption_image(&self, image_base64: &str) -> Result<String, ProviderError>;

    /// Produce a study-level summary from ordered slice captions.
    async fn summarize_series(&self, captions: &[String]) -> Result<String, ProviderError>;
}

/// A general-purpose text model backing caption enhancement, metadata
/// extraction, report synthesis, and conversation.
#[async_trait]
pub trait TextInference: Send + Sync {
    /// Full-quality generation for clinically sensitive output.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Lightweight generation for rewrites and chat titles.
    async fn generate_fast(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Full-quality generation over a prompt plus one inline JPEG.
    async fn generate_with_image(
        &self,
        prompt: &str,
        image_base64: &str,
    ) -> Result<String, ProviderError>;

    /// Open a streaming conversation. Chunks arrive on the returned channel
    /// as they are decoded from the provider.
    async fn stream_conversation(
        &self,
        system_prompt: &str,
        turns: Vec<ChatTurn>,
    ) -> Result<ReplyStream, ProviderError>;
}

/// Mock vision provider for testing. Serves a fixed caption and summary, or
/// a configured error, and counts calls.
pub struct MockVision {
    label: &'static str,
    outcome: Result<String, ProviderError>,
    calls: AtomicU32,
}

impl MockVision {
    pub fn new(label: &'static str, text: &str) -> Self {
        Self {
            label,
            outcome: Ok(text.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(label: &'static str, error: ProviderError) -> Self {
        Self {
            label,
            outcome: Err(error),
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionInference for MockVision {
    fn provider_name(&self) -> &'static str {
        self.label
    }

    async fn caption_image(&self, _image_base64: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }

    async fn summarize_series(&self, _captions: &[String]) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Mock text provider for testing. Returns a fixed response, or a configured
/// error, and streams configured chunks for conversations.
pub struct MockText {
    response: String,
    stream_chunks: Vec<String>,
    error: Option<ProviderError>,
    calls: AtomicU32,
}

impl MockText {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            stream_chunks: Vec::new(),
            error: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            response: String::new(),
            stream_chunks: Vec::new(),
            error: Some(error),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_stream(mut self, chunks: Vec<String>) -> Self {
        self.stream_chunks = chunks;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn text_outcome(&self) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.response.clone()),
        }
    }
}

#[async_trait]
impl TextInference for MockText {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.text_outcome()
    }

    async fn generate_fast(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.text_outcome()
    }

    async fn generate_with_image(
        &self,
        _prompt: &str,
        _image_base64: &str,
    ) -> Result<String, ProviderError> {
        self.text_outcome()
    }

    async fn stream_conversation(
        &self,
        _system_prompt: &str,
        _turns: Vec<ChatTurn>,
    ) -> Result<ReplyStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let chunks = if self.stream_chunks.is_empty() {
            vec![self.response.clone()]
        } else {
            self.stream_chunks.clone()
        };
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
