use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::MessageRole;
use crate::models::{Chat, ChatMessage};

pub fn insert_chat(conn: &Connection, chat: &Chat) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO chats (id, patient_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            chat.id.to_string(),
            chat.patient_id.to_string(),
            chat.title,
            chat.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_chat(conn: &Connection, id: &Uuid) -> Result<Option<Chat>, DatabaseError> {
    let result = conn
        .query_row(
            "SELECT id, patient_id, title, created_at FROM chats WHERE id = ?1",
            params![id.to_string()],
            chat_from_row,
        )
        .optional()?;
    Ok(result)
}

pub fn list_chats_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<Chat>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, title, created_at
         FROM chats WHERE patient_id = ?1 ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map(params![patient_id.to_string()], chat_from_row)?;

    let mut chats = Vec::new();
    for row in rows {
        chats.push(row?);
    }
    Ok(chats)
}

pub fn update_chat_title(conn: &Connection, id: &Uuid, title: &str) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE chats SET title = ?2 WHERE id = ?1",
        params![id.to_string(), title],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "chat".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn insert_message(conn: &Connection, msg: &ChatMessage) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO messages (id, chat_id, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            msg.id.to_string(),
            msg.chat_id.to_string(),
            msg.role.as_str(),
            msg.content,
            msg.created_at,
        ],
    )?;
    Ok(())
}

/// Full turn history for one chat, oldest first.
pub fn list_messages_for_chat(
    conn: &Connection,
    chat_id: &Uuid,
) -> Result<Vec<ChatMessage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, role, content, created_at
         FROM messages WHERE chat_id = ?1 ORDER BY created_at ASC",
    )?;

    let rows = stmt.query_map(params![chat_id.to_string()], |row| {
        Ok(MessageRow {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(message_from_row(row?)?);
    }
    Ok(messages)
}

pub fn count_messages(conn: &Connection, chat_id: &Uuid) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
        params![chat_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

struct MessageRow {
    id: String,
    chat_id: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

fn chat_from_row(row: &rusqlite::Row<'_>) -> Result<Chat, rusqlite::Error> {
    Ok(Chat {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
        patient_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap_or_default(),
        title: row.get(2)?,
        created_at: row.get::<_, DateTime<Utc>>(3)?,
    })
}

fn message_from_row(row: MessageRow) -> Result<ChatMessage, DatabaseError> {
    Ok(ChatMessage {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        chat_id: Uuid::parse_str(&row.chat_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        role: MessageRole::from_str(&row.role)?,
        content: row.content,
        created_at: row.created_at,
    })
}
