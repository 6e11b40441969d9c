pub mod captioning;
pub mod citations;
pub mod conversation;
pub mod inference;
pub mod metadata;
pub mod parse;
pub mod prompts;
pub mod report;
