//! Domain entities: patients, imaging studies, slices, reports, chats.

pub mod chat;
pub mod enums;
pub mod patient;
pub mod report;
pub mod study;

pub use chat::{Chat, ChatMessage};
pub use enums::{FieldConfidence, MessageRole, StudyProcessingState};
pub use patient::Patient;
pub use report::{CitationMap, Report, ReportPayload};
pub use study::{Study, StudyImage};
