//! Chat endpoints: chat CRUD, the streaming message turn, and titles.
//!
//! A message turn persists the user message, opens the provider stream, and
//! relays chunks over a chunked `text/plain` body. The assembled reply is
//! persisted when the stream ends; a dropped client connection drops the
//! body, which cancels the provider request.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::endpoints::parse_id;
use crate::api::error::ApiError;
use crate::api::types::AppContext;
use crate::db;
use crate::models::chat::NEW_CHAT_TITLE;
use crate::models::enums::MessageRole;
use crate::models::{Chat, ChatMessage};

/// Upper bound on one user message.
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Deserialize)]
pub struct CreateChatRequest {
    pub patient_id: String,
}

/// `POST /api/chats`
pub async fn create(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    let patient_id = parse_id(&req.patient_id, "patient")?;
    if ctx
        .with_conn(|conn| db::get_patient(conn, &patient_id))?
        .is_none()
    {
        return Err(ApiError::NotFound("Patient not found".into()));
    }

    let chat = Chat {
        id: Uuid::new_v4(),
        patient_id,
        title: NEW_CHAT_TITLE.to_string(),
        created_at: Utc::now(),
    };
    ctx.with_conn(|conn| db::insert_chat(conn, &chat))?;
    Ok((StatusCode::CREATED, Json(chat)))
}

#[derive(Serialize)]
pub struct ChatDetail {
    #[serde(flatten)]
    pub chat: Chat,
    /// Messages in creation order.
    pub messages: Vec<ChatMessage>,
}

/// `GET /api/chats/:id`
pub async fn detail(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<ChatDetail>, ApiError> {
    let id = parse_id(&id, "chat")?;
    let chat = ctx
        .with_conn(|conn| db::get_chat(conn, &id))?
        .ok_or_else(|| ApiError::NotFound("Chat not found".into()))?;
    let messages = ctx.with_conn(|conn| db::list_messages_for_chat(conn, &id))?;
    Ok(Json(ChatDetail { chat, messages }))
}

/// `GET /api/patients/:id/chats`
pub async fn list_for_patient(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Chat>>, ApiError> {
    let patient_id = parse_id(&id, "patient")?;
    if ctx
        .with_conn(|conn| db::get_patient(conn, &patient_id))?
        .is_none()
    {
        return Err(ApiError::NotFound("Patient not found".into()));
    }
    let chats = ctx.with_conn(|conn| db::list_chats_for_patient(conn, &patient_id))?;
    Ok(Json(chats))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// `POST /api/chats/:id/messages` — streaming reply turn.
pub async fn send_message(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".into()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Message too long (maximum {MAX_MESSAGE_CHARS} characters)"
        )));
    }

    let chat_id = parse_id(&id, "chat")?;
    let chat = ctx
        .with_conn(|conn| db::get_chat(conn, &chat_id))?
        .ok_or_else(|| ApiError::NotFound("Chat not found".into()))?;
    let patient = ctx
        .with_conn(|conn| db::get_patient(conn, &chat.patient_id))?
        .ok_or_else(|| ApiError::NotFound("Patient not found".into()))?;
    let studies = ctx.with_conn(|conn| db::list_studies_for_patient(conn, &patient.id))?;
    let latest_report = ctx.with_conn(|conn| db::latest_report_for_patient(conn, &patient.id))?;

    // Persist the user turn before the provider call so history survives a
    // failed or abandoned stream.
    let user_message = ChatMessage {
        id: Uuid::new_v4(),
        chat_id,
        role: MessageRole::User,
        content,
        created_at: Utc::now(),
    };
    ctx.with_conn(|conn| db::insert_message(conn, &user_message))?;
    let history = ctx.with_conn(|conn| db::list_messages_for_chat(conn, &chat_id))?;

    let reply = ctx
        .conversation
        .begin_reply(
            &patient,
            &studies,
            latest_report.as_ref().map(|r| &r.payload),
            &history,
        )
        .await?;

    let relay = futures_util::stream::unfold(
        (reply, String::new(), ctx.clone()),
        move |(mut rx, mut assembled, ctx)| async move {
            match rx.recv().await {
                Some(Ok(chunk)) => {
                    assembled.push_str(&chunk);
                    Some((
                        Ok::<Bytes, std::convert::Infallible>(Bytes::from(chunk)),
                        (rx, assembled, ctx),
                    ))
                }
                Some(Err(error)) => {
                    tracing::warn!(chat_id = %chat_id, error = %error, "Reply stream failed mid-turn");
                    persist_reply(&ctx, chat_id, assembled);
                    None
                }
                None => {
                    persist_reply(&ctx, chat_id, assembled);
                    None
                }
            }
        },
    );

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(relay),
    )
        .into_response())
}

/// Store the assembled assistant reply once the stream has ended. Failures
/// are logged only; the chunks already left for the client.
fn persist_reply(ctx: &AppContext, chat_id: Uuid, assembled: String) {
    if assembled.is_empty() {
        return;
    }
    let message = ChatMessage {
        id: Uuid::new_v4(),
        chat_id,
        role: MessageRole::Assistant,
        content: assembled,
        created_at: Utc::now(),
    };
    if let Err(error) = ctx.with_conn(|conn| db::insert_message(conn, &message)) {
        tracing::error!(chat_id = %chat_id, error = %error, "Failed to persist assistant reply");
    }
}

#[derive(Serialize)]
pub struct TitleResponse {
    pub title: String,
}

/// `POST /api/chats/:id/title` — derive and persist a title from the
/// conversation so far.
pub async fn generate_title(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<TitleResponse>, ApiError> {
    let chat_id = parse_id(&id, "chat")?;
    if ctx
        .with_conn(|conn| db::get_chat(conn, &chat_id))?
        .is_none()
    {
        return Err(ApiError::NotFound("Chat not found".into()));
    }

    let messages = ctx.with_conn(|conn| db::list_messages_for_chat(conn, &chat_id))?;
    let title = ctx.conversation.chat_title(&messages).await;
    ctx.with_conn(|conn| db::update_chat_title(conn, &chat_id, &title))?;
    Ok(Json(TitleResponse { title }))
}
