//! Conversational follow-up over a patient's studies and latest report.
//!
//! Builds the grounding system prompt, normalizes stored history into the
//! provider's turn vocabulary, and relays the reply stream to the caller.
//! The caller owns persistence of the assembled reply and, afterwards,
//! title generation.

use std::sync::Arc;

use crate::models::chat::NEW_CHAT_TITLE;
use crate::models::enums::MessageRole;
use crate::models::{ChatMessage, Patient, ReportPayload, Study};
use crate::pipeline::inference::{
    ChatTurn, ProviderError, ReplyStream, RetryPolicy, TextInference, TurnRole,
};
use crate::pipeline::prompts;

const TITLE_MAX_CHARS: usize = 50;
const TITLE_CONTEXT_MESSAGES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl ChatError {
    /// True when the provider refused the conversation content itself, so
    /// the caller can suggest rephrasing instead of reporting an outage.
    pub fn is_safety_block(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::SafetyBlocked))
    }
}

pub struct ConversationOrchestrator {
    text: Arc<dyn TextInference>,
    retry: RetryPolicy,
}

impl ConversationOrchestrator {
    pub fn new(text: Arc<dyn TextInference>, retry: RetryPolicy) -> Self {
        Self { text, retry }
    }

    /// Start streaming a reply to the latest user message in `history`.
    ///
    /// `history` is the chat's full ordered message list, ending with the
    /// user message being answered. A leading assistant welcome turn is
    /// stripped so the submitted sequence starts on a user turn; roles are
    /// mapped to the provider vocabulary. Dropping the returned stream
    /// cancels the underlying request.
    pub async fn begin_reply(
        &self,
        patient: &Patient,
        studies: &[Study],
        latest_report: Option<&ReportPayload>,
        history: &[ChatMessage],
    ) -> Result<ReplyStream, ChatError> {
        let mut ordered: Vec<&Study> = studies.iter().collect();
        ordered.sort_by_key(|s| s.imaging_datetime);
        let ordered: Vec<Study> = ordered.into_iter().cloned().collect();

        let system = prompts::conversation_system_prompt(patient, &ordered, latest_report);
        let turns = normalize_history(history);
        tracing::info!(
            patient_id = %patient.id,
            turns = turns.len(),
            has_report = latest_report.is_some(),
            "Starting conversation turn"
        );

        let stream = self.text.stream_conversation(&system, turns).await?;
        Ok(stream)
    }

    /// Derive a short title for the chat from its opening messages.
    ///
    /// Chats with at most one message keep the placeholder without a
    /// provider call. Never fails: a provider failure falls back to a
    /// truncation of the first user message.
    pub async fn chat_title(&self, messages: &[ChatMessage]) -> String {
        if messages.len() <= 1 {
            return NEW_CHAT_TITLE.to_string();
        }

        let transcript = messages
            .iter()
            .take(TITLE_CONTEXT_MESSAGES)
            .map(|message| {
                let speaker = match message.role {
                    MessageRole::Assistant => "AI",
                    MessageRole::User => "User",
                };
                format!("{speaker}: {}", message.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = prompts::chat_title_prompt(&transcript);
        match self
            .retry
            .run("chat_title", || self.text.generate_fast(&prompt))
            .await
        {
            Ok(title) => truncate_title(&title),
            Err(error) => {
                tracing::warn!(error = %error, "Chat title generation failed, using first user message");
                let first_user = messages
                    .iter()
                    .find(|m| m.role == MessageRole::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or(NEW_CHAT_TITLE);
                truncate_title(first_user)
            }
        }
    }
}

/// Map stored messages onto provider turns, dropping a leading assistant
/// welcome so the sequence starts with a user turn or is empty.
fn normalize_history(history: &[ChatMessage]) -> Vec<ChatTurn> {
    let body = match history.first() {
        Some(first) if first.role == MessageRole::Assistant => &history[1..],
        _ => history,
    };
    body.iter()
        .map(|message| {
            let role = match message.role {
                MessageRole::User => TurnRole::User,
                MessageRole::Assistant => TurnRole::Model,
            };
            ChatTurn {
                role,
                text: message.content.clone(),
            }
        })
        .collect()
}

fn truncate_title(raw: &str) -> String {
    raw.trim().chars().take(TITLE_MAX_CHARS).collect()
}
