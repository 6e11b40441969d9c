//! Route handlers, one module per resource.

pub mod chats;
pub mod patients;
pub mod reports;
pub mod studies;

use uuid::Uuid;

use crate::api::error::ApiError;

/// Parse a path id, mapping a bad uuid to a structured 400 instead of the
/// extractor's plain-text rejection.
pub(crate) fn parse_id(raw: &str, entity: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid {entity} id: {raw}")))
}
