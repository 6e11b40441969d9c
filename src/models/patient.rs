use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub age: i64,
    pub sex: String,
    pub reason_for_imaging: Option<String>,
    pub created_at: DateTime<Utc>,
}
